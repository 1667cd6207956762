pub mod feed_poller;
pub mod verification_worker;
