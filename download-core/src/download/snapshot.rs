//! Read-only view of a download.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Download;
use crate::config::ConflictAction;
use crate::domain::DownloadState;
use crate::host::ManId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadSnapshot {
    pub id: String,
    pub state: DownloadState,
    pub man_id: Option<ManId>,
    pub bridge_job_id: Option<String>,
    pub written: u64,
    pub total_size: Option<u64>,
    pub retries: u32,
    pub deadline: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub prerolled: bool,
    pub url: String,
    pub referrer: Option<String>,
    pub destination: Option<PathBuf>,
    pub conflict_action: ConflictAction,
    pub mime: Option<String>,
    pub server_name: Option<String>,
    pub browser_name: Option<String>,
    pub final_url: Option<String>,
}

impl DownloadSnapshot {
    /// Completed fraction, when the size is known.
    pub fn progress(&self) -> Option<f64> {
        self.total_size
            .filter(|total| *total > 0)
            .map(|total| self.written as f64 / total as f64)
    }
}

impl From<&Download> for DownloadSnapshot {
    fn from(download: &Download) -> Self {
        Self {
            id: download.id.clone(),
            state: download.state,
            man_id: download.backend.man_id(),
            bridge_job_id: download.backend.job_id().map(str::to_string),
            written: download.written,
            total_size: download.total_size,
            retries: download.retries,
            deadline: download.deadline,
            error: download.error.clone(),
            prerolled: download.prerolled,
            url: download.meta.url.clone(),
            referrer: download.meta.referrer.clone(),
            destination: download.meta.destination.clone(),
            conflict_action: download.meta.conflict_action,
            mime: download.meta.mime.clone(),
            server_name: download.meta.server_name.clone(),
            browser_name: download.meta.browser_name.clone(),
            final_url: download.meta.final_url.clone(),
        }
    }
}

impl Download {
    pub fn snapshot(&self) -> DownloadSnapshot {
        DownloadSnapshot::from(self)
    }
}
