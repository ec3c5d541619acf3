//! Backend selection: host service first, native bridge as fallback.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::Download;
use super::backend::{Backend, BridgeLink};
use super::request::TransferRequest;
use crate::bridge::{BridgeConnector, BridgeRequest, DownloadStart, StatPath};
use crate::host::{HostDownloadOptions, ManId};
use crate::{Error, Result};

impl Download {
    pub(super) async fn select_backend(&mut self, request: TransferRequest) -> Result<()> {
        let mut options = HostDownloadOptions::from_request(
            request,
            self.target_filename(),
            self.meta.conflict_action,
        );

        let host_error = match self.attempt_host_service(&mut options).await {
            Ok(man_id) => {
                info!(download_id = %self.id, man_id, "Registered with host download service");
                self.replace_backend(Backend::HostService(man_id));
                self.ctx.collection.set_dirty(self);
                return Ok(());
            }
            Err(e) => e,
        };

        let Some(connector) = self.ctx.bridge.clone() else {
            return Err(Error::BackendUnavailable(host_error.to_string()));
        };
        info!(
            download_id = %self.id,
            error = %host_error,
            "Host download service refused, falling back to native bridge"
        );
        self.attempt_bridge(connector.as_ref(), &options).await
    }

    /// Register with the host. A rejected request carrying a Referer header is
    /// retried once without it; `options` keeps the last attempted headers.
    async fn attempt_host_service(&self, options: &mut HostDownloadOptions) -> Result<ManId> {
        match self.ctx.host.download(options).await {
            Ok(man_id) => Ok(man_id),
            Err(first) => {
                if !options.strip_referrer() {
                    return Err(first);
                }
                debug!(
                    download_id = %self.id,
                    error = %first,
                    "Retrying host registration without referrer"
                );
                self.ctx.host.download(options).await
            }
        }
    }

    /// Open a bridge channel and start the job. Further progress arrives as
    /// events.
    async fn attempt_bridge(
        &mut self,
        connector: &dyn BridgeConnector,
        options: &HostDownloadOptions,
    ) -> Result<()> {
        let (channel, events) = connector.connect().await?;

        let start = DownloadStart {
            url: options.url.clone(),
            referrer: self.meta.referrer.clone(),
            headers: options.headers.clone(),
            method: options.method.clone(),
            body: options.body.clone(),
            filename: options.filename.clone(),
        };
        let job_id = match channel.request(BridgeRequest::DownloadStart(start)).await {
            Ok(reply) => reply.id.filter(|id| !id.is_empty()),
            Err(e) => {
                channel.disconnect();
                return Err(e);
            }
        };
        let Some(job_id) = job_id else {
            channel.disconnect();
            return Err(Error::bridge("download_start reply carried no id"));
        };

        info!(download_id = %self.id, job_id = %job_id, "Native bridge job started");
        self.replace_backend(Backend::Bridge(BridgeLink {
            channel,
            events,
            job_id,
            temp_path: None,
        }));
        self.ctx.collection.set_dirty(self);
        Ok(())
    }

    fn target_filename(&self) -> Option<String> {
        self.meta
            .destination
            .as_deref()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .or_else(|| self.meta.server_name.clone())
    }

    /// Where a helper-completed file should end up: the configured folder
    /// override joined with the file name, else the requested destination.
    ///
    /// The override is checked through the helper first; a folder it cannot
    /// create or fill falls back to the destination.
    pub(super) async fn final_path(&self, temp_path: &Path, size: u64) -> Option<PathBuf> {
        let Some(folder) = self.ctx.settings.native_download_folder.as_deref() else {
            return self.meta.destination.clone();
        };
        let name = self
            .meta
            .destination
            .as_deref()
            .and_then(Path::file_name)
            .or_else(|| {
                self.meta
                    .server_name
                    .as_deref()
                    .and_then(|n| Path::new(n).file_name())
            })
            .or_else(|| temp_path.file_name())?;

        match self.stat_folder(folder, size).await {
            Ok(folder) => Some(folder.join(name)),
            Err(e) => {
                warn!(
                    download_id = %self.id,
                    folder = %folder.display(),
                    error = %e,
                    "Download folder unusable, using requested destination"
                );
                self.meta.destination.clone()
            }
        }
    }

    /// Ask the helper to create `folder` if needed and check it has room for
    /// `size` bytes. Returns the folder as the helper resolved it.
    async fn stat_folder(&self, folder: &Path, size: u64) -> Result<PathBuf> {
        let Some(link) = self.backend.bridge() else {
            return Err(Error::BridgeClosed);
        };
        let reply = link
            .channel
            .request(BridgeRequest::StatPath(StatPath {
                path: folder.to_string_lossy().into_owned(),
                required_bytes: Some(size),
                auto_create: true,
            }))
            .await?;
        if reply.created == Some(true) {
            info!(download_id = %self.id, folder = %folder.display(), "Created download folder");
        }
        Ok(reply.path.map_or_else(|| folder.to_path_buf(), PathBuf::from))
    }

    /// Ask the helper to move its temp file. Returns where the file ended up.
    pub(super) async fn move_via_bridge(&self, src: &Path, dst: &Path) -> Result<PathBuf> {
        let Some(link) = self.backend.bridge() else {
            return Err(Error::BridgeClosed);
        };
        let reply = link
            .channel
            .request(BridgeRequest::Move {
                src: src.to_string_lossy().into_owned(),
                dst: dst.to_string_lossy().into_owned(),
            })
            .await?;
        if reply.path.is_none() {
            warn!(download_id = %self.id, "Move reply carried no path, assuming destination");
        }
        Ok(reply
            .path
            .map(Into::into)
            .unwrap_or_else(|| dst.to_path_buf()))
    }
}
