//! Active backend of a download and the cleanup paths that release it.

use std::path::PathBuf;

use tracing::debug;

use super::Download;
use crate::bridge::{BridgeChannel, BridgeEvents, BridgeRequest};
use crate::host::ManId;

/// Which backend currently carries the transfer.
#[derive(Debug, Default)]
pub enum Backend {
    #[default]
    None,
    /// Registered with the host download service.
    HostService(ManId),
    /// Running in the native helper.
    Bridge(BridgeLink),
}

/// An open bridge job.
#[derive(Debug)]
pub struct BridgeLink {
    pub channel: BridgeChannel,
    pub events: BridgeEvents,
    pub job_id: String,
    /// Where the helper is writing, once a progress event told us.
    pub temp_path: Option<PathBuf>,
}

impl Backend {
    pub fn man_id(&self) -> Option<ManId> {
        match self {
            Self::HostService(id) => Some(*id),
            _ => None,
        }
    }

    pub fn bridge(&self) -> Option<&BridgeLink> {
        match self {
            Self::Bridge(link) => Some(link),
            _ => None,
        }
    }

    pub fn bridge_mut(&mut self) -> Option<&mut BridgeLink> {
        match self {
            Self::Bridge(link) => Some(link),
            _ => None,
        }
    }

    pub fn job_id(&self) -> Option<&str> {
        self.bridge().map(|link| link.job_id.as_str())
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::HostService(_) => "host",
            Self::Bridge(_) => "bridge",
        }
    }
}

impl Download {
    /// Disconnect and forget the bridge job, if any.
    ///
    /// Idempotent: a second call finds no bridge and does nothing.
    pub fn cleanup_native(&mut self) {
        if !matches!(self.backend, Backend::Bridge(_)) {
            return;
        }
        if let Backend::Bridge(link) = std::mem::take(&mut self.backend) {
            debug!(download_id = %self.id, job_id = %link.job_id, "Disconnecting bridge job");
            link.channel.disconnect();
        }
    }

    /// Deregister the host service id, if any, from the owning collection.
    pub(super) fn release_man_id(&mut self) {
        if let Some(id) = self.backend.man_id() {
            debug!(download_id = %self.id, man_id = id, "Releasing host service id");
            self.ctx.collection.remove_man_id(id);
            self.backend = Backend::None;
        }
    }

    /// Switch to `next`, releasing whatever backend was active before.
    pub(super) fn replace_backend(&mut self, next: Backend) {
        self.cleanup_native();
        self.release_man_id();
        if let Some(id) = next.man_id() {
            self.ctx.collection.add_man_id(id, &self.id);
        }
        self.backend = next;
    }

    /// Fire-and-forget a control message to the bridge job, if any.
    pub(super) fn notify_bridge(&self, make: impl FnOnce(String) -> BridgeRequest) {
        let Some(link) = self.backend.bridge() else {
            return;
        };
        let request = make(link.job_id.clone());
        let kind = request.kind();
        if let Err(e) = link.channel.notify(request) {
            debug!(download_id = %self.id, kind, error = %e, "Bridge control message dropped");
        }
    }
}
