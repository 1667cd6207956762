//! Error helpers shared by all plume crates.

use std::{error, fmt};

pub type BoxedError = Box<dyn error::Error + Send + Sync + 'static>;
pub type BoxedErrorResult<T> = std::result::Result<T, BoxedError>;

pub type WhateverResult<T> = std::result::Result<T, snafu::Whatever>;

/// Displays an error followed by every `source()` in its chain, separated by
/// `: `, on a single line. Meant for structured log fields.
pub struct FmtCompactError<'e, E: ?Sized>(pub &'e E);

impl<E> fmt::Display for FmtCompactError<'_, E>
where
    E: error::Error + ?Sized,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;

        let mut source = self.0.source();
        while let Some(err) = source {
            write!(f, ": {err}")?;
            source = err.source();
        }

        Ok(())
    }
}

pub trait FmtCompact<'e> {
    type Report: fmt::Display + 'e;
    fn fmt_compact(self) -> Self::Report;
}

impl<'e, E> FmtCompact<'e> for &'e E
where
    E: error::Error + ?Sized,
{
    type Report = FmtCompactError<'e, E>;

    fn fmt_compact(self) -> Self::Report {
        FmtCompactError(self)
    }
}
