//! Ingestion and rendering pipeline of a relay-fed feed view
//!
//! A [`FeedController`] owns the [`NoteStore`] of one view. It pulls records
//! from a [`RecordSource`], passes them through the [`FilterConfig`], hands
//! admitted records to the verification worker and the [`ProfileCache`], and
//! announces every visible change as a [`FeedEvent`].

pub mod config;
pub mod controller;
pub mod embed;
pub mod error;
pub mod events;
pub mod filter;
pub mod pool;
pub mod profile_cache;
pub mod source;
pub mod store;
mod task;
pub mod thread;
pub mod verify;

pub use self::config::FeedConfig;
pub use self::controller::{FeedController, FeedHandle, FeedMode, FeedTarget};
pub use self::embed::{EmbedResolver, ResolvedContent, Segment};
pub use self::error::{FeedError, FeedResult, SourceError, SourceResult};
pub use self::events::{BadgeState, FailurePhase, FeedEvent, IngestState};
pub use self::filter::{FilterConfig, FilterSettings};
pub use self::pool::{RelayConnector, RelayFrame, RelayPool};
pub use self::profile_cache::ProfileCache;
pub use self::source::{
    FeedQuery, Nip19Decoder, RecordSource, ReferenceDecoder, RelayUrl, StreamMessage,
    Subscription, Verification, Verifier,
};
pub use self::store::{MergeMode, NoteStore};
pub use self::thread::Thread;
pub use self::verify::StructuralVerifier;
