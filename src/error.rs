use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Fatal failures. Anything recoverable is a [`crate::splitter::Warning`] instead.
#[derive(Debug, Error)]
pub enum SplitError {
    #[error("failed to create output directory {}", path.display())]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read input at line {line}")]
    Read {
        line: usize,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T, E = SplitError> = std::result::Result<T, E>;
