//! The download entity and its state machine operations.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::backend::Backend;
use super::request::TransferRequest;
use crate::bridge::{BridgeConnector, BridgeRequest};
use crate::collection::DownloadCollection;
use crate::config::{ConflictAction, DownloadSettings};
use crate::domain::{DownloadState, ErrorClass, RetryPolicy, StateSet, classify};
use crate::host::{HostDownloadService, HostSnapshot, HostState, ManId};
use crate::preroll::{NoPreroll, PrerollRequest, Preroller};
use crate::{Error, Result};

/// Collaborators and policy shared by the downloads of one collection.
#[derive(Clone)]
pub struct DownloadContext {
    pub host: Arc<dyn HostDownloadService>,
    pub bridge: Option<Arc<dyn BridgeConnector>>,
    pub collection: Arc<dyn DownloadCollection>,
    pub preroller: Arc<dyn Preroller>,
    pub policy: RetryPolicy,
    pub settings: DownloadSettings,
}

impl DownloadContext {
    pub fn new(
        host: Arc<dyn HostDownloadService>,
        collection: Arc<dyn DownloadCollection>,
    ) -> Self {
        let settings = DownloadSettings::default();
        Self {
            host,
            bridge: None,
            collection,
            preroller: Arc::new(NoPreroll),
            policy: settings.retry_policy(),
            settings,
        }
    }

    /// Enable the native bridge fallback.
    pub fn with_bridge(mut self, connector: Arc<dyn BridgeConnector>) -> Self {
        self.bridge = Some(connector);
        self
    }

    pub fn with_preroller(mut self, preroller: Arc<dyn Preroller>) -> Self {
        self.preroller = preroller;
        self
    }

    /// Apply preferences. The retry policy is rebuilt from them.
    pub fn with_settings(mut self, settings: DownloadSettings) -> Self {
        self.policy = settings.retry_policy();
        self.settings = settings;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Parameters for a new download.
#[derive(Debug, Clone, Default)]
pub struct DownloadRequest {
    pub id: Option<String>,
    pub url: String,
    pub referrer: Option<String>,
    pub post_data: Option<String>,
    pub destination: Option<PathBuf>,
    pub conflict_action: Option<ConflictAction>,
    pub man_id: Option<ManId>,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = Some(referrer.into());
        self
    }

    pub fn post_data(mut self, data: impl Into<String>) -> Self {
        self.post_data = Some(data.into());
        self
    }

    pub fn destination(mut self, destination: impl Into<PathBuf>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn conflict_action(mut self, action: ConflictAction) -> Self {
        self.conflict_action = Some(action);
        self
    }

    /// Host service id from an earlier session, for restart recovery.
    pub fn man_id(mut self, id: ManId) -> Self {
        self.man_id = Some(id);
        self
    }
}

/// Request and descriptive metadata.
#[derive(Debug, Clone, Default)]
pub(super) struct Metadata {
    pub url: String,
    pub referrer: Option<String>,
    pub post_data: Option<String>,
    pub destination: Option<PathBuf>,
    pub conflict_action: ConflictAction,
    pub mime: Option<String>,
    pub server_name: Option<String>,
    pub browser_name: Option<String>,
    pub final_url: Option<String>,
}

/// One download and its lifecycle.
///
/// All mutation happens through `&mut self`, so a single owner (normally a
/// [`DownloadActor`](super::DownloadActor)) serializes every operation.
pub struct Download {
    pub(super) id: String,
    pub(super) state: DownloadState,
    pub(super) backend: Backend,
    pub(super) written: u64,
    pub(super) total_size: Option<u64>,
    pub(super) retries: u32,
    pub(super) deadline: Option<DateTime<Utc>>,
    pub(super) error: Option<String>,
    pub(super) prerolled: bool,
    pub(super) meta: Metadata,
    pub(super) ctx: DownloadContext,
}

impl fmt::Debug for Download {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Download")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("backend", &self.backend.kind())
            .field("written", &self.written)
            .field("total_size", &self.total_size)
            .field("retries", &self.retries)
            .field("error", &self.error)
            .field("url", &self.meta.url)
            .finish_non_exhaustive()
    }
}

impl Download {
    /// Create a QUEUED download.
    pub fn new(request: DownloadRequest, ctx: DownloadContext) -> Self {
        let conflict_action = request
            .conflict_action
            .unwrap_or(ctx.settings.conflict_action);
        Self {
            id: request
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            state: DownloadState::Queued,
            backend: request
                .man_id
                .filter(|id| *id != 0)
                .map_or(Backend::None, Backend::HostService),
            written: 0,
            total_size: None,
            retries: 0,
            deadline: None,
            error: None,
            prerolled: false,
            meta: Metadata {
                url: request.url,
                referrer: request.referrer,
                post_data: request.post_data,
                destination: request.destination,
                conflict_action,
                ..Default::default()
            },
            ctx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> DownloadState {
        self.state
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn man_id(&self) -> Option<ManId> {
        self.backend.man_id()
    }

    pub fn bridge_job_id(&self) -> Option<&str> {
        self.backend.job_id()
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn total_size(&self) -> Option<u64> {
        self.total_size
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn prerolled(&self) -> bool {
        self.prerolled
    }

    pub fn url(&self) -> &str {
        &self.meta.url
    }

    pub fn referrer(&self) -> Option<&str> {
        self.meta.referrer.as_deref()
    }

    pub fn post_data(&self) -> Option<&str> {
        self.meta.post_data.as_deref()
    }

    pub fn destination(&self) -> Option<&Path> {
        self.meta.destination.as_deref()
    }

    pub fn conflict_action(&self) -> ConflictAction {
        self.meta.conflict_action
    }

    pub fn mime(&self) -> Option<&str> {
        self.meta.mime.as_deref()
    }

    pub fn server_name(&self) -> Option<&str> {
        self.meta.server_name.as_deref()
    }

    pub fn browser_name(&self) -> Option<&str> {
        self.meta.browser_name.as_deref()
    }

    pub fn final_url(&self) -> Option<&str> {
        self.meta.final_url.as_deref()
    }

    /// A RETRYING download whose deadline has passed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state == DownloadState::Retrying
            && self.deadline.is_none_or(|deadline| deadline <= now)
    }

    /// Move to `new`, replacing the recorded error with `error`.
    ///
    /// Same-state changes are no-ops. The collection hears about every
    /// effective change exactly once.
    pub(super) fn change_state(&mut self, new: DownloadState, error: Option<String>) -> Result<()> {
        let old = self.state;
        if old == new {
            return Ok(());
        }
        let next = old.transition_to(new)?;

        self.error = error.filter(|e| !e.is_empty());
        self.state = next;

        debug!(download_id = %self.id, from = %old, to = %next, "Download state changed");
        self.ctx.collection.changed_state(self, old, next);
        Ok(())
    }

    /// Reach RUNNING or DONE from a resting state through legal edges only.
    pub(super) fn walk_to(&mut self, target: DownloadState) -> Result<()> {
        debug_assert!(matches!(
            target,
            DownloadState::Running | DownloadState::Done
        ));
        if self.state.is_in(StateSet::FORCABLE) && !self.state.can_transition_to(target) {
            self.change_state(DownloadState::Queued, None)?;
        }
        if self.state == DownloadState::Queued && !self.state.can_transition_to(target) {
            self.change_state(DownloadState::Running, None)?;
        }
        self.change_state(target, None)
    }

    pub(super) fn record_error(&mut self, error: impl Into<String>) {
        let error = error.into();
        self.error = (!error.is_empty()).then_some(error);
        self.ctx.collection.set_dirty(self);
    }

    /// Raise counters, keeping `written <= total_size` when the size is known.
    pub(super) fn update_counters(&mut self, written: u64, total: Option<u64>) {
        self.written = self.written.max(written);
        if let Some(total) = total.filter(|t| *t > 0) {
            self.total_size = Some(self.total_size.unwrap_or(0).max(total));
        }
        if let Some(total) = self.total_size {
            if self.written > total {
                self.total_size = Some(self.written);
            }
        }
    }

    /// Start the download. Valid only from QUEUED.
    ///
    /// Backend failures do not surface here: the download is canceled with
    /// the error recorded instead.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != DownloadState::Queued {
            return Err(Error::InvalidState {
                operation: "start",
                state: self.state,
            });
        }

        if let Err(e) = self.start_inner().await {
            error!(download_id = %self.id, error = %e, "Failed to start download");
            let message = e.to_string();
            self.cancel().await;
            if self.state == DownloadState::Canceled {
                self.record_error(message);
            }
        }
        Ok(())
    }

    async fn start_inner(&mut self) -> Result<()> {
        if let Some(man_id) = self.backend.man_id() {
            if self.resume_host_record(man_id).await? {
                return Ok(());
            }
        }

        if let Some(job_id) = self.backend.job_id() {
            info!(download_id = %self.id, job_id, "Continuing bridge job");
            return self.change_state(DownloadState::Running, None);
        }

        self.change_state(DownloadState::Running, None)?;

        if !self.prerolled {
            self.preroll().await;
            if self.state != DownloadState::Running {
                debug!(download_id = %self.id, state = %self.state, "Preroll aborted start");
                return Ok(());
            }
        }

        let request = TransferRequest::build(
            &self.meta.url,
            self.meta.referrer.as_deref(),
            self.meta.post_data.as_deref(),
            &self.id,
            self.ctx.host.supports_referrer(),
        );
        self.select_backend(request).await
    }

    /// Try to pick up an existing host service record. Returns whether the
    /// download now tracks it.
    async fn resume_host_record(&mut self, man_id: ManId) -> Result<bool> {
        let snapshots = match self.ctx.host.search(man_id).await {
            Ok(snapshots) => snapshots,
            Err(e) => {
                warn!(download_id = %self.id, man_id, error = %e, "Host search failed");
                Vec::new()
            }
        };

        if let Some(snapshot) = snapshots.first() {
            match snapshot.state {
                Some(HostState::InProgress)
                    if !snapshot.paused && snapshot.error_code().is_none() =>
                {
                    info!(download_id = %self.id, man_id, "Adopting running host transfer");
                    self.adopt_snapshot_metadata(snapshot);
                    self.change_state(DownloadState::Running, None)?;
                    return Ok(true);
                }
                Some(HostState::Complete) => {
                    info!(download_id = %self.id, man_id, "Host transfer already complete");
                    self.adopt_snapshot_metadata(snapshot);
                    self.walk_to(DownloadState::Done)?;
                    return Ok(true);
                }
                _ if snapshot.can_resume => {
                    info!(download_id = %self.id, man_id, "Resuming host transfer");
                    // Some hosts only return from resume once the transfer
                    // ends. Never await it; snapshots correct the state later.
                    let host = Arc::clone(&self.ctx.host);
                    tokio::spawn(async move {
                        if let Err(e) = host.resume(man_id).await {
                            warn!(man_id, error = %e, "Host resume failed");
                        }
                    });
                    self.adopt_snapshot_metadata(snapshot);
                    self.change_state(DownloadState::Running, None)?;
                    return Ok(true);
                }
                _ => {}
            }
        }

        debug!(download_id = %self.id, man_id, "Dropping stale host service id");
        self.release_man_id();
        Ok(false)
    }

    async fn preroll(&mut self) {
        let request = PrerollRequest {
            url: self.meta.url.clone(),
            referrer: self.meta.referrer.clone(),
            headers: Vec::new(),
        };
        if !self.ctx.preroller.should_preroll(&request) {
            return;
        }

        let outcome = match self.ctx.preroller.roll(&request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(download_id = %self.id, error = %e, "Preroll failed");
                None
            }
        };
        self.prerolled = true;

        let Some(outcome) = outcome else {
            return;
        };
        if let Some(code) = outcome.error {
            self.cancel_according_to_error(&code).await;
            return;
        }
        if let Some(mime) = outcome.mime {
            self.meta.mime = Some(mime);
        }
        if let Some(name) = outcome.name {
            self.meta.server_name = Some(name);
        }
        if let Some(final_url) = outcome.final_url {
            self.meta.final_url = Some(final_url);
        }
        self.ctx.collection.set_dirty(self);
    }

    /// Pause a RUNNING download. With `retry`, it becomes RETRYING with a
    /// wake-up deadline.
    pub async fn pause(&mut self, retry: bool) {
        if !self.state.is_in(StateSet::PAUSEABLE) {
            return;
        }

        self.deadline = retry.then(|| {
            self.ctx
                .policy
                .deadline_for(self.retries.max(1), Utc::now())
        });

        if let Some(man_id) = self.backend.man_id() {
            if let Err(e) = self.ctx.host.pause(man_id).await {
                warn!(download_id = %self.id, man_id, error = %e, "Host pause failed, canceling");
                self.cancel().await;
                return;
            }
        }
        self.notify_bridge(|id| BridgeRequest::DownloadPause { id });

        let target = if retry {
            DownloadState::Retrying
        } else {
            DownloadState::Paused
        };
        if let Err(e) = self.change_state(target, None) {
            warn!(download_id = %self.id, error = %e, "Pause rejected");
        }
    }

    /// Re-queue a PAUSED or RETRYING download.
    pub fn resume(&mut self, forced: bool) {
        if !self.state.is_in(StateSet::FORCABLE) {
            return;
        }
        self.notify_bridge(|id| BridgeRequest::DownloadResume { id });
        if let Err(e) = self.change_state(DownloadState::Queued, None) {
            warn!(download_id = %self.id, error = %e, "Resume rejected");
            return;
        }
        if forced {
            self.ctx.collection.start_download(&self.id);
        }
    }

    /// Abort the download. The host record is canceled and erased on a best
    /// effort basis after the state is committed.
    pub async fn cancel(&mut self) {
        if !self.state.is_in(StateSet::CANCELABLE) {
            return;
        }

        let man_id = self.backend.man_id();
        self.notify_bridge(|id| BridgeRequest::DownloadCancel { id });
        self.reset();
        if let Err(e) = self.change_state(DownloadState::Canceled, None) {
            warn!(download_id = %self.id, error = %e, "Cancel rejected");
        }

        if let Some(man_id) = man_id {
            if let Err(e) = self.ctx.host.cancel(man_id).await {
                debug!(man_id, error = %e, "Host cancel failed");
            }
            if let Err(e) = self.ctx.host.erase(man_id).await {
                debug!(man_id, error = %e, "Host erase failed");
            }
        }
    }

    /// Clear every transient field and release both backends.
    pub fn reset(&mut self) {
        self.prerolled = false;
        self.release_man_id();
        self.cleanup_native();
        self.written = 0;
        self.total_size = None;
        self.meta.mime = None;
        self.meta.server_name = None;
        self.meta.browser_name = None;
        self.meta.final_url = None;
        self.retries = 0;
        self.deadline = None;
    }

    /// Cancel on fatal errors or exhausted retries, otherwise pause for a
    /// retry. The error is recorded either way.
    pub async fn cancel_according_to_error(&mut self, code: &str) {
        if classify(code) == ErrorClass::Fatal || !self.ctx.policy.should_retry(self.retries) {
            info!(
                download_id = %self.id,
                error = code,
                retries = self.retries,
                "Canceling after error"
            );
            self.cancel().await;
            self.record_error(code);
            return;
        }

        self.retries += 1;
        info!(download_id = %self.id, error = code, retries = self.retries, "Scheduling retry");
        self.pause(true).await;
        self.record_error(code);
    }

    /// Apply a host service snapshot.
    pub async fn update_state_from_browser(&mut self, snapshot: &HostSnapshot) {
        if self.state.is_terminal() {
            return;
        }
        self.adopt_snapshot_metadata(snapshot);

        let result = match snapshot.state {
            Some(HostState::InProgress | HostState::Interrupted) if snapshot.paused => {
                self.change_state(DownloadState::Paused, None)
            }
            Some(HostState::InProgress | HostState::Interrupted) => match snapshot.error_code() {
                // A parked download keeps waiting for its deadline; only a
                // running transfer spends a retry.
                Some(code)
                    if self.state.is_in(StateSet::PAUSEABLE)
                        || classify(code) == ErrorClass::Fatal =>
                {
                    let code = code.to_string();
                    self.cancel_according_to_error(&code).await;
                    Ok(())
                }
                Some(code) => {
                    debug!(
                        download_id = %self.id,
                        state = %self.state,
                        error = code,
                        "Host still reports error"
                    );
                    self.record_error(code);
                    Ok(())
                }
                None if snapshot.state == Some(HostState::InProgress) => {
                    self.walk_to(DownloadState::Running)
                }
                None => {
                    self.reset();
                    self.change_state(DownloadState::Canceled, None)
                }
            },
            Some(HostState::Complete) => self.walk_to(DownloadState::Done),
            None => Ok(()),
        };

        if let Err(e) = result {
            debug!(download_id = %self.id, error = %e, "Ignoring host snapshot");
        }
        self.ctx.collection.set_dirty(self);
    }

    fn adopt_snapshot_metadata(&mut self, snapshot: &HostSnapshot) {
        if let Some(name) = snapshot
            .filename
            .as_deref()
            .and_then(|f| Path::new(f).file_name())
        {
            self.meta.browser_name = Some(name.to_string_lossy().into_owned());
        }
        if self.meta.mime.is_none() {
            self.meta.mime = snapshot.mime.clone().filter(|m| !m.is_empty());
        }
        self.update_counters(snapshot.received(), snapshot.known_total());
    }

    /// The host forgot the transfer.
    pub fn set_missing(&mut self) {
        info!(download_id = %self.id, state = %self.state, "Host service lost the transfer");
        match self.state {
            DownloadState::Running => {
                self.reset();
                if let Err(e) = self.change_state(DownloadState::Missing, None) {
                    warn!(download_id = %self.id, error = %e, "Missing rejected");
                }
            }
            state if state.is_terminal() => self.release_man_id(),
            _ => self.reset(),
        }
        self.ctx.collection.set_dirty(self);
    }

    /// Periodic check against the active backend.
    pub async fn reconcile(&mut self) {
        if self.state.is_terminal() {
            return;
        }

        if let Some(man_id) = self.backend.man_id() {
            match self.ctx.host.search(man_id).await {
                Ok(snapshots) => match snapshots.first() {
                    Some(snapshot) => self.update_state_from_browser(snapshot).await,
                    None => self.set_missing(),
                },
                Err(e) => warn!(download_id = %self.id, man_id, error = %e, "Host search failed"),
            }
            return;
        }

        if self.state == DownloadState::Running && self.backend.is_none() {
            let code = self
                .error
                .clone()
                .unwrap_or_else(|| crate::domain::codes::DISCONNECTED.to_string());
            self.cancel_according_to_error(&code).await;
        }
    }
}
