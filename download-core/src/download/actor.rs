//! Actor owning one download.
//!
//! The mailbox is the only way in, so operations never interleave: a second
//! `Start` waits until the first one has returned. Bridge events are drained
//! by the same loop in arrival order.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{Download, DownloadSnapshot};
use crate::host::HostSnapshot;
use crate::{Error, Result};

/// Default mailbox capacity.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 32;

/// Messages understood by a [`DownloadActor`].
#[derive(Debug)]
pub enum DownloadCommand {
    Start(oneshot::Sender<Result<()>>),
    Pause {
        retry: bool,
        reply: oneshot::Sender<()>,
    },
    Resume {
        forced: bool,
        reply: oneshot::Sender<()>,
    },
    Cancel(oneshot::Sender<()>),
    Reset(oneshot::Sender<()>),
    /// A state snapshot pushed by the host service.
    HostSnapshot(Box<HostSnapshot>, oneshot::Sender<()>),
    Reconcile(oneshot::Sender<()>),
    GetSnapshot(oneshot::Sender<DownloadSnapshot>),
    /// Stop the actor, handing the download back.
    Stop,
}

/// How the run loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorOutcome {
    Stopped,
    Cancelled,
}

pub struct DownloadActor {
    download: Download,
    mailbox: mpsc::Receiver<DownloadCommand>,
    cancellation_token: CancellationToken,
}

impl DownloadActor {
    pub fn new(
        download: Download,
        cancellation_token: CancellationToken,
    ) -> (Self, DownloadHandle) {
        let (tx, rx) = mpsc::channel(DEFAULT_MAILBOX_CAPACITY);
        let handle = DownloadHandle {
            id: download.id().to_string(),
            sender: tx,
            cancellation_token: cancellation_token.clone(),
        };
        (
            Self {
                download,
                mailbox: rx,
                cancellation_token,
            },
            handle,
        )
    }

    /// Spawn the actor onto the runtime.
    pub fn spawn(
        download: Download,
        cancellation_token: CancellationToken,
    ) -> (DownloadHandle, JoinHandle<(Download, ActorOutcome)>) {
        let (actor, handle) = Self::new(download, cancellation_token);
        (handle, tokio::spawn(actor.run()))
    }

    /// Run until stopped, cancelled, or every handle is dropped. The download
    /// is returned to the caller.
    pub async fn run(mut self) -> (Download, ActorOutcome) {
        info!("DownloadActor {} starting", self.download.id());

        let outcome = loop {
            tokio::select! {
                biased;

                msg = self.mailbox.recv() => match msg {
                    Some(DownloadCommand::Stop) | None => break ActorOutcome::Stopped,
                    Some(msg) => self.handle_command(msg).await,
                },

                event = self.download.next_bridge_event() => match event {
                    Some(event) => self.download.handle_bridge_event(event).await,
                    None => self.download.handle_bridge_closed(),
                },

                _ = self.cancellation_token.cancelled() => {
                    info!("DownloadActor {} cancelled", self.download.id());
                    break ActorOutcome::Cancelled;
                }
            }
        };

        debug!(download_id = %self.download.id(), ?outcome, "DownloadActor stopped");
        (self.download, outcome)
    }

    async fn handle_command(&mut self, msg: DownloadCommand) {
        let download = &mut self.download;
        match msg {
            DownloadCommand::Start(reply) => {
                let _ = reply.send(download.start().await);
            }
            DownloadCommand::Pause { retry, reply } => {
                download.pause(retry).await;
                let _ = reply.send(());
            }
            DownloadCommand::Resume { forced, reply } => {
                download.resume(forced);
                let _ = reply.send(());
            }
            DownloadCommand::Cancel(reply) => {
                download.cancel().await;
                let _ = reply.send(());
            }
            DownloadCommand::Reset(reply) => {
                download.reset();
                let _ = reply.send(());
            }
            DownloadCommand::HostSnapshot(snapshot, reply) => {
                download.update_state_from_browser(&snapshot).await;
                let _ = reply.send(());
            }
            DownloadCommand::Reconcile(reply) => {
                download.reconcile().await;
                let _ = reply.send(());
            }
            DownloadCommand::GetSnapshot(reply) => {
                let _ = reply.send(download.snapshot());
            }
            DownloadCommand::Stop => {}
        }
    }
}

/// Cloneable sender side of a [`DownloadActor`].
#[derive(Debug, Clone)]
pub struct DownloadHandle {
    id: String,
    sender: mpsc::Sender<DownloadCommand>,
    cancellation_token: CancellationToken,
}

impl DownloadHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_alive(&self) -> bool {
        !self.sender.is_closed() && !self.cancellation_token.is_cancelled()
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> DownloadCommand) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(make(tx))
            .await
            .map_err(|_| Error::ActorStopped)?;
        rx.await.map_err(|_| Error::ActorStopped)
    }

    /// Queue a start behind any in-flight operation and wait for it.
    pub async fn start(&self) -> Result<()> {
        self.call(DownloadCommand::Start).await?
    }

    pub async fn pause(&self, retry: bool) -> Result<()> {
        self.call(|reply| DownloadCommand::Pause { retry, reply }).await
    }

    pub async fn resume(&self, forced: bool) -> Result<()> {
        self.call(|reply| DownloadCommand::Resume { forced, reply }).await
    }

    pub async fn cancel(&self) -> Result<()> {
        self.call(DownloadCommand::Cancel).await
    }

    pub async fn reset(&self) -> Result<()> {
        self.call(DownloadCommand::Reset).await
    }

    pub async fn apply_host_snapshot(&self, snapshot: HostSnapshot) -> Result<()> {
        self.call(|reply| DownloadCommand::HostSnapshot(Box::new(snapshot), reply)).await
    }

    pub async fn reconcile(&self) -> Result<()> {
        self.call(DownloadCommand::Reconcile).await
    }

    pub async fn snapshot(&self) -> Result<DownloadSnapshot> {
        self.call(DownloadCommand::GetSnapshot).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.sender
            .send(DownloadCommand::Stop)
            .await
            .map_err(|_| Error::ActorStopped)
    }
}
