use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The trace file could not be opened or read
    #[error("cannot read trace file {path:?} ({source})")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error ({0})")]
    Io(#[from] io::Error),

    #[error("failed to write JSON output ({0})")]
    Json(#[from] serde_json::Error),

    #[error("failed to write tabular output ({0})")]
    Csv(#[from] csv::Error),

    /// No task record survived parsing and filtering
    #[error("trace contains no task records")]
    EmptyTrace,

    /// Every record ends at time zero, so ratios over the span are undefined
    #[error("trace spans zero time")]
    ZeroSpan,

    #[error("cannot summarize an empty sample")]
    EmptySample,

    #[error("invalid configuration: {0}")]
    Config(String),
}
