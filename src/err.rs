use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BamSieveError>;

/// One stage of a streaming pipeline that did not complete cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub stage: String,
    pub reason: String,
}

impl StageFailure {
    pub fn new(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.stage, self.reason)
    }
}

fn join_failures(failures: &[StageFailure]) -> String {
    failures
        .iter()
        .map(|failure| failure.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug)]
pub enum BamSieveError {
    /// Missing or unreadable input, or a read count that could not be obtained at all.
    #[error("input error for {}: {reason}", path.display())]
    Input { path: PathBuf, reason: String },

    /// Request rejected before any external process is spawned.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("pipeline failed ({})", join_failures(.0))]
    Pipeline(Vec<StageFailure>),

    #[error("malformed SAM record at line {line}: {reason}")]
    MalformedRecord { line: u64, reason: String },

    #[error("could not publish {}: {source}", path.display())]
    Publish {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not index {}: {reason}", path.display())]
    Index { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}
