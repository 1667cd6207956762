use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use plume_core::AuthorId;
use plume_feed::RelayUrl;

/// Command line options for the Plume CLI application
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Opts {
    /// The specific command to execute
    #[command(subcommand)]
    pub cmd: OptsCmd,
}

#[derive(Debug, Subcommand)]
pub enum OptsCmd {
    /// Load a record archive through the feed pipeline and print the view
    Replay(ReplayOpts),

    /// Decode a `note`, `nevent`, `npub` or `nprofile` reference
    Decode {
        /// The reference, with or without the `nostr:` prefix
        token: String,
    },

    /// Check whether a text would be hidden as an unreadable payload
    Inspect {
        /// Text to check
        text: String,
    },
}

#[derive(Debug, Args)]
pub struct ReplayOpts {
    /// Archive of records, one JSON event per line
    #[arg(long)]
    pub archive: PathBuf,

    /// Sources to attribute the archive to
    #[arg(
        long = "relay",
        env = "PLUME_RELAYS",
        value_delimiter = ',',
        default_value = "wss://archive.invalid"
    )]
    pub relays: Vec<RelayUrl>,

    /// JSON file with mute settings
    #[arg(long, env = "PLUME_FILTER_FILE")]
    pub filter_file: Option<PathBuf>,

    /// Show only notes of these authors
    #[arg(long = "follow")]
    pub follows: Vec<AuthorId>,

    /// Show notes and reposts of a single author
    #[arg(long, conflicts_with = "follows")]
    pub profile: Option<AuthorId>,

    /// Fetch in one batch instead of streaming
    #[arg(long)]
    pub batch: bool,

    /// Resolve embedded references of every shown record
    #[arg(long)]
    pub embeds: bool,

    /// Seconds between background polls
    #[arg(long, env = "PLUME_POLL_INTERVAL_SECS", default_value = "60")]
    pub poll_interval_secs: u64,

    /// How long to wait for badges and profiles before printing
    #[arg(long, default_value = "5")]
    pub settle_secs: u64,
}
