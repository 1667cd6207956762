use plume_core::RecordId;
use plume_util_error::BoxedError;
use snafu::Snafu;

use crate::source::RelayUrl;

/// Failure of an upstream operation
///
/// Only `NoSources` and `Unreachable` ever leave a [`crate::RelayPool`];
/// single-relay and single-payload failures are logged and skipped there.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SourceError {
    #[snafu(display("No sources to query"))]
    NoSources,
    #[snafu(display("All {attempted} sources unreachable"))]
    Unreachable { attempted: usize },
    #[snafu(display("Source {relay} failed"))]
    Relay { relay: RelayUrl, source: BoxedError },
    #[snafu(display("Malformed payload"))]
    Decode { source: serde_json::Error },
    #[snafu(display("Stream closed before end of stored records"))]
    Closed,
}

pub type SourceResult<T> = std::result::Result<T, SourceError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum RelayUrlError {
    #[snafu(display("Invalid relay url"))]
    Parse { source: url::ParseError },
    #[snafu(display("Unsupported relay url scheme: {scheme}"))]
    Scheme { scheme: String },
    #[snafu(display("Relay url has no host"))]
    MissingHost,
}

pub type RelayUrlResult<T> = std::result::Result<T, RelayUrlError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum FeedError {
    #[snafu(display("Feed is not loaded"))]
    NotLoaded,
    #[snafu(display("Feed target changed while the operation was in flight"))]
    Stale,
    #[snafu(display("Record {id} not found"))]
    RecordNotFound { id: RecordId },
    #[snafu(transparent)]
    Source { source: SourceError },
}

pub type FeedResult<T> = std::result::Result<T, FeedError>;
