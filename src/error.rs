use std::io;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SkeinError>;

/// Errors surfaced by the sketching core and the graph orchestrator.
///
/// Sampling outcomes (`Zero`, `Good`, `Fail`) are *statuses*, not errors;
/// see [`crate::sketch::SketchSample`]. Only protocol violations and
/// environmental failures appear here.
#[derive(Debug, Error)]
pub enum SkeinError {
    /// Every sample slot of a sketch has been consumed.
    #[error("sketch sample budget exhausted")]
    OutOfQueries,
    /// An update arrived while a connectivity query holds the graph.
    /// The caller should back off and retry once the query completes.
    #[error("graph is locked for a connectivity query")]
    UpdateLocked,
    /// I/O failure while serializing or restoring sketch state.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// A caller-supplied value is out of range or malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Serialized sketch data does not match the expected layout.
    #[error("corruption detected: {0}")]
    Corruption(String),
}
