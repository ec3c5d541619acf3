//! Crate-wide error types.

use thiserror::Error;

use crate::domain::DownloadState;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid state: cannot {operation} a download that is {state}")]
    InvalidState {
        operation: &'static str,
        state: DownloadState,
    },

    #[error("Invalid state transition: cannot transition from {from} to {to}")]
    InvalidStateTransition {
        from: DownloadState,
        to: DownloadState,
    },

    #[error("Host download service error: {0}")]
    HostService(String),

    #[error("No download backend available: {0}")]
    BackendUnavailable(String),

    #[error("Native bridge error: {0}")]
    Bridge(String),

    #[error("Native bridge channel is closed")]
    BridgeClosed,

    #[error("Download actor has stopped")]
    ActorStopped,

    #[error("Native messaging error: {0}")]
    Codec(#[from] native_messaging::NativeMessagingError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn host(msg: impl Into<String>) -> Self {
        Self::HostService(msg.into())
    }

    pub fn bridge(msg: impl Into<String>) -> Self {
        Self::Bridge(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}
