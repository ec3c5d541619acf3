//! Bridge event handling and the post-completion handoff.

use std::path::PathBuf;

use tracing::{debug, info, trace, warn};

use super::Download;
use super::backend::Backend;
use crate::bridge::{BridgeEvent, DoneEvent};
use crate::domain::{DownloadState, codes};
use crate::host::HostDownloadOptions;

impl Download {
    /// Next event of the active bridge job. `None` once the channel closed.
    /// Pends forever while no bridge job is active.
    pub async fn next_bridge_event(&mut self) -> Option<BridgeEvent> {
        match &mut self.backend {
            Backend::Bridge(link) => link.events.recv().await,
            _ => std::future::pending().await,
        }
    }

    /// Apply one bridge event. Events are authoritative for the state they
    /// report; late events for an abandoned job are dropped.
    pub async fn handle_bridge_event(&mut self, event: BridgeEvent) {
        if self.state.is_terminal() {
            trace!(download_id = %self.id, "Ignoring bridge event for finished download");
            return;
        }
        if self.backend.job_id() != Some(event.job_id()) {
            debug!(
                download_id = %self.id,
                job_id = event.job_id(),
                "Ignoring event for another job"
            );
            return;
        }

        match event {
            BridgeEvent::Progress {
                downloaded,
                total,
                path,
                ..
            } => {
                if let (Some(path), Some(link)) = (path, self.backend.bridge_mut()) {
                    link.temp_path = Some(PathBuf::from(path));
                }
                self.update_counters(downloaded, total);
                self.ctx.collection.set_dirty(self);
            }
            BridgeEvent::Paused { downloaded, .. } => {
                self.update_counters(downloaded, None);
                if self.state == DownloadState::Running {
                    if let Err(e) = self.change_state(DownloadState::Paused, None) {
                        warn!(download_id = %self.id, error = %e, "Bridge pause rejected");
                    }
                }
                self.ctx.collection.set_dirty(self);
            }
            BridgeEvent::Cancelled { .. } => {
                info!(download_id = %self.id, "Bridge job cancelled");
                self.reset();
                if let Err(e) =
                    self.change_state(DownloadState::Canceled, Some(codes::CANCELLED.to_string()))
                {
                    warn!(download_id = %self.id, error = %e, "Bridge cancel rejected");
                }
            }
            BridgeEvent::Done(done) => self.complete_from_bridge(done).await,
            BridgeEvent::Error { error, .. } => {
                warn!(download_id = %self.id, error = %error, "Bridge job failed");
                self.cleanup_native();
                self.record_error(error);
            }
        }
    }

    /// The bridge channel closed without a terminal event.
    pub fn handle_bridge_closed(&mut self) {
        if self.backend.bridge().is_none() {
            return;
        }
        warn!(download_id = %self.id, "Native bridge channel closed");
        self.cleanup_native();
        if !self.state.is_terminal() {
            self.record_error(codes::DISCONNECTED);
        }
    }

    /// Relocate the helper's file, hand it to the host service and finish.
    ///
    /// Every failure degrades to DONE with the last known local path.
    async fn complete_from_bridge(&mut self, done: DoneEvent) {
        let temp_path = PathBuf::from(&done.path);
        let mut location = temp_path.clone();

        let target = self.final_path(&temp_path, done.size).await;
        if let Some(target) = target.filter(|t| *t != temp_path) {
            match self.move_via_bridge(&temp_path, &target).await {
                Ok(moved) => location = moved,
                Err(e) => warn!(
                    download_id = %self.id,
                    target = %target.display(),
                    error = %e,
                    "Failed to move completed file, keeping helper path"
                ),
            }
        }
        self.cleanup_native();

        match HostDownloadOptions::for_local_file(&location, self.meta.conflict_action) {
            Ok(options) => match self.ctx.host.download(&options).await {
                Ok(man_id) => {
                    debug!(download_id = %self.id, man_id, "Handed completed file to host service");
                    self.replace_backend(Backend::HostService(man_id));
                }
                Err(e) => debug!(
                    download_id = %self.id,
                    error = %e,
                    "Host service did not take completed file"
                ),
            },
            Err(e) => debug!(download_id = %self.id, error = %e, "Completed file has no file URL"),
        }

        if let Some(final_url) = done.final_url {
            self.meta.final_url = Some(final_url);
        }
        self.meta.browser_name = location
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        self.meta.destination = Some(location);
        self.written = done.size;
        self.total_size = Some(done.size);

        if let Err(e) = self.walk_to(DownloadState::Done) {
            warn!(download_id = %self.id, error = %e, "Could not mark bridge download done");
        }
        info!(download_id = %self.id, size = done.size, "Bridge download complete");
        self.ctx.collection.set_dirty(self);
    }
}
