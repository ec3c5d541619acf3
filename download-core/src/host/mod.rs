//! Host download service boundary.
//!
//! The host service (for example a browser's own download manager) performs
//! and tracks transfers outside our control. The lifecycle only talks to it
//! through [`HostDownloadService`].

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ConflictAction;
use crate::download::{Header, TransferRequest};
use crate::{Error, Result};

/// Identifier the host service assigns to a registered transfer.
pub type ManId = u64;

/// Options for registering a transfer with the host service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostDownloadOptions {
    pub url: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default)]
    pub conflict_action: ConflictAction,
}

impl HostDownloadOptions {
    pub fn from_request(
        request: TransferRequest,
        filename: Option<String>,
        conflict_action: ConflictAction,
    ) -> Self {
        Self {
            url: request.url,
            method: request.method,
            body: request.body,
            headers: request.headers,
            filename,
            conflict_action,
        }
    }

    /// Options that register an already-downloaded local file.
    pub fn for_local_file(path: &Path, conflict_action: ConflictAction) -> Result<Self> {
        let url = url::Url::from_file_path(path)
            .map_err(|_| Error::Other(format!("not an absolute path: {}", path.display())))?;
        Ok(Self {
            url: url.to_string(),
            method: "GET".to_string(),
            body: None,
            headers: Vec::new(),
            filename: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
            conflict_action,
        })
    }

    /// Remove the Referer header. Returns whether one was present.
    pub fn strip_referrer(&mut self) -> bool {
        crate::download::request::strip_referrer(&mut self.headers)
    }
}

/// State field of a host snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostState {
    InProgress,
    Interrupted,
    Complete,
}

/// What the host service currently reports for one transfer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostSnapshot {
    pub state: Option<HostState>,
    pub paused: bool,
    pub error: Option<String>,
    pub can_resume: bool,
    pub filename: Option<String>,
    pub bytes_received: i64,
    pub total_bytes: i64,
    pub file_size: i64,
    pub mime: Option<String>,
}

impl HostSnapshot {
    pub fn new(state: HostState) -> Self {
        Self {
            state: Some(state),
            total_bytes: -1,
            file_size: -1,
            ..Default::default()
        }
    }

    /// The error code, with empty strings treated as no error.
    pub fn error_code(&self) -> Option<&str> {
        self.error.as_deref().filter(|e| !e.is_empty())
    }

    /// Best known total size, if the host knows it.
    pub fn known_total(&self) -> Option<u64> {
        [self.total_bytes, self.file_size]
            .into_iter()
            .find(|size| *size > 0)
            .map(|size| size as u64)
    }

    pub fn received(&self) -> u64 {
        self.bytes_received.max(0) as u64
    }
}

/// Host download service contract.
#[async_trait]
pub trait HostDownloadService: Send + Sync {
    /// Register a transfer and return its id.
    async fn download(&self, options: &HostDownloadOptions) -> Result<ManId>;

    async fn pause(&self, id: ManId) -> Result<()>;

    /// Resume a paused or interrupted transfer.
    ///
    /// Some hosts only return once the transfer finishes, so callers must not
    /// block on this.
    async fn resume(&self, id: ManId) -> Result<()>;

    async fn cancel(&self, id: ManId) -> Result<()>;

    /// Remove the transfer from the host's records.
    async fn erase(&self, id: ManId) -> Result<()>;

    /// Look up the transfer. An empty result means the host forgot it.
    async fn search(&self, id: ManId) -> Result<Vec<HostSnapshot>>;

    /// Whether the host accepts a Referer header directly. Hosts that do not
    /// get a correlation header instead.
    fn supports_referrer(&self) -> bool {
        true
    }
}

/// Host service that refuses every registration, forcing the bridge path.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableHostService;

#[async_trait]
impl HostDownloadService for UnavailableHostService {
    async fn download(&self, _options: &HostDownloadOptions) -> Result<ManId> {
        Err(Error::host("host download service is not available"))
    }

    async fn pause(&self, id: ManId) -> Result<()> {
        Err(Error::host(format!("unknown download {id}")))
    }

    async fn resume(&self, id: ManId) -> Result<()> {
        Err(Error::host(format!("unknown download {id}")))
    }

    async fn cancel(&self, id: ManId) -> Result<()> {
        Err(Error::host(format!("unknown download {id}")))
    }

    async fn erase(&self, _id: ManId) -> Result<()> {
        Ok(())
    }

    async fn search(&self, _id: ManId) -> Result<Vec<HostSnapshot>> {
        Ok(Vec::new())
    }
}
