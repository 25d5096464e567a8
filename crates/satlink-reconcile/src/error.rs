//! Error types for satlink-reconcile.

use std::path::PathBuf;

use satlink_topology::{AddressError, TopologyError};
use thiserror::Error;

/// Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading, applying or scanning.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error on a specific path
    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Malformed or incompatible snapshot
    #[error("Topology error: {0}")]
    Topology(#[from] TopologyError),

    /// Address allocation fault (always fatal)
    #[error("Address allocation error: {0}")]
    Address(#[from] AddressError),

    /// Input directory missing or not a directory
    #[error("Input directory not found: {0:?}")]
    InputDirectory(PathBuf),

    /// Input directory holds no snapshot files
    #[error("No snapshot files in {0:?}")]
    NoSnapshots(PathBuf),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid snapshot name pattern
    #[error("Pattern error: {0}")]
    Pattern(#[from] regex::Error),
}

impl Error {
    /// Wrap an IO error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the loop must halt instead of skipping the cycle.
    ///
    /// Only allocation faults and startup errors qualify. Everything else is
    /// an input or substrate problem the next snapshot can recover from.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Address(_)
                | Error::InputDirectory(_)
                | Error::NoSnapshots(_)
                | Error::Config(_)
                | Error::Pattern(_)
        )
    }
}
