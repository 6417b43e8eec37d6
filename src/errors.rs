use std::{error::Error, fmt, io};

/// The error type for tag registration, configuration parsing, and the read
/// processing pipeline.
///
/// All registration and configuration errors are fatal and reported before any
/// read is processed. I/O failures occurring while reads are in flight are
/// wrapped in [`BatchIo`] together with the batch in which they occurred.
///
/// [`BatchIo`]: DemuxError::BatchIo
#[non_exhaustive]
#[derive(Debug)]
pub enum DemuxError {
    /// A syntactic violation in a tag record.
    InvalidTag { tag: String, reason: String },
    /// A malformed `mismatch[:indel[:total]]` distance string.
    InvalidDistance(String),
    /// A malformed `file[:start[:end]]` location string.
    InvalidLocation(String),
    /// A malformed `0|1[:extra]` trim string.
    InvalidTrim(String),
    /// Two tags claim the same sequence over overlapping windows, and at least
    /// one of the claims is through a canonical (user-written) sequence.
    CanonicalCollision { tag: String, other: String, variant: String },
    /// A mutation was attempted after the index was closed.
    IndexClosed,
    /// An inconsistency in the command-line or file configuration.
    Config(String),
    /// An I/O failure outside of read processing.
    Io(io::Error),
    /// An I/O failure while processing reads, tagged with the batch id.
    BatchIo { batch_id: u64, source: io::Error },
}

impl DemuxError {
    /// Attaches the one-based row number of a tag table to the error message.
    pub(crate) fn at_row(self, row: usize) -> Self {
        match self {
            DemuxError::InvalidTag { tag, reason } => DemuxError::InvalidTag {
                tag,
                reason: format!("{reason} (row {row})"),
            },
            DemuxError::InvalidDistance(s) => DemuxError::InvalidDistance(format!("{s} (row {row})")),
            DemuxError::InvalidLocation(s) => DemuxError::InvalidLocation(format!("{s} (row {row})")),
            DemuxError::InvalidTrim(s) => DemuxError::InvalidTrim(format!("{s} (row {row})")),
            other => other,
        }
    }
}

impl fmt::Display for DemuxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DemuxError::InvalidTag { tag, reason } => write!(f, "Tag \"{tag}\": {reason}"),
            DemuxError::InvalidDistance(s) => write!(f, "Distance string is invalid: {s}"),
            DemuxError::InvalidLocation(s) => write!(f, "Location string is invalid: {s}"),
            DemuxError::InvalidTrim(s) => write!(f, "Trim string is invalid: {s}"),
            DemuxError::CanonicalCollision { tag, other, variant } => {
                write!(f, "Tag \"{tag}\" collides with tag \"{other}\" over sequence {variant}")
            }
            DemuxError::IndexClosed => write!(f, "The tag index is closed and can no longer be modified"),
            DemuxError::Config(s) => write!(f, "{s}"),
            DemuxError::Io(e) => write!(f, "{e}"),
            DemuxError::BatchIo { batch_id, source } => {
                write!(f, "I/O failure while processing batch {batch_id}: {source}")
            }
        }
    }
}

impl Error for DemuxError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DemuxError::Io(e) | DemuxError::BatchIo { source: e, .. } => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for DemuxError {
    #[inline]
    fn from(value: io::Error) -> Self {
        DemuxError::Io(value)
    }
}
