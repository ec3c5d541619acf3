//! download-core library crate.
//!
//! Drives a single download through its lifecycle on top of two
//! interchangeable backends: the host's own download service and a native
//! helper process reached over a length-prefixed JSON channel.

pub mod bridge;
pub mod collection;
pub mod config;
pub mod domain;
pub mod download;
pub mod error;
pub mod host;
pub mod logging;
pub mod preroll;

#[cfg(test)]
pub(crate) mod testing;

pub use collection::DownloadCollection;
pub use config::{ConflictAction, DownloadSettings};
pub use domain::{DownloadState, ErrorClass, RetryPolicy, StateSet, classify};
pub use download::{
    Download, DownloadActor, DownloadContext, DownloadHandle, DownloadRequest, DownloadSnapshot,
};
pub use error::{Error, Result};
pub use host::{HostDownloadOptions, HostDownloadService, HostSnapshot, HostState, ManId};
