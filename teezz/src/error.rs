use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TeezzError>;

/// Error kinds surfaced at the boundaries of a single sequence run or a
/// single format-recovery step. None of these are meant to propagate out
/// of the fuzz loop's outer iteration: a bad candidate is confined,
/// classified, logged, and the loop moves on.
#[derive(Debug, Error)]
pub enum TeezzError {
    #[error("wire timeout waiting for executor response after {0:?}")]
    WireTimeout(std::time::Duration),

    #[error("executor connection reset by peer")]
    PeerReset,

    #[error("malformed response: declared length {declared} but received {received}")]
    MalformedResponse { declared: usize, received: usize },

    #[error("value-dependency inconsistency: {0}")]
    ValueDependencyInconsistency(String),

    #[error("device unresponsive after {attempts} reset attempts")]
    DeviceUnresponsive { attempts: u32 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("device command failed: {0}")]
    DeviceCommand(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl TeezzError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TeezzError::Io {
            path: path.into(),
            source,
        }
    }
}
