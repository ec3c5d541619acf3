//! Long-lived channel to the native helper.
//!
//! One task owns both halves of the framed stream. Outgoing requests are
//! written in submission order and their replies are matched first-in
//! first-out; frames carrying a `type` are pushed onto the event queue.
//! Closing the channel ends the task, which in turn closes the event queue.

use std::collections::VecDeque;

use futures::{SinkExt, StreamExt};
use native_messaging::NativeMessageCodec;
use process_utils::StdioChild;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::protocol::{BridgeEvent, BridgeReply, BridgeRequest, Inbound};
use crate::{Error, Result};

/// Receiving side of a channel's event queue.
pub type BridgeEvents = mpsc::UnboundedReceiver<BridgeEvent>;

struct Outgoing {
    request: BridgeRequest,
    reply: Option<oneshot::Sender<BridgeReply>>,
}

/// Handle to a running bridge channel task.
///
/// Dropping the handle disconnects the channel.
#[derive(Debug)]
pub struct BridgeChannel {
    outgoing: mpsc::UnboundedSender<Outgoing>,
    token: CancellationToken,
}

impl BridgeChannel {
    /// Start a channel over an arbitrary byte stream pair.
    pub fn spawn<R, W>(reader: R, writer: W) -> (Self, BridgeEvents)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::spawn_inner(reader, writer, None)
    }

    /// Start a channel over a helper process' stdio. The process is killed
    /// when the channel closes.
    pub fn spawn_with_child(helper: StdioChild) -> (Self, BridgeEvents) {
        let StdioChild {
            child,
            stdin,
            stdout,
        } = helper;
        Self::spawn_inner(stdout, stdin, Some(child))
    }

    fn spawn_inner<R, W>(reader: R, writer: W, child: Option<Child>) -> (Self, BridgeEvents)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        tokio::spawn(run_channel(
            reader,
            writer,
            outgoing_rx,
            events_tx,
            token.clone(),
            child,
        ));

        (
            Self {
                outgoing: outgoing_tx,
                token,
            },
            events_rx,
        )
    }

    /// Send a request and wait for its reply. `ok:false` replies become
    /// [`Error::Bridge`].
    pub async fn request(&self, request: BridgeRequest) -> Result<BridgeReply> {
        let kind = request.kind();
        let (tx, rx) = oneshot::channel();
        self.outgoing
            .send(Outgoing {
                request,
                reply: Some(tx),
            })
            .map_err(|_| Error::BridgeClosed)?;

        let reply = rx.await.map_err(|_| Error::BridgeClosed)?;
        trace!(kind, ok = reply.ok, "Bridge reply received");
        reply.into_result()
    }

    /// Send a request without waiting for its reply.
    pub fn notify(&self, request: BridgeRequest) -> Result<()> {
        self.outgoing
            .send(Outgoing {
                request,
                reply: None,
            })
            .map_err(|_| Error::BridgeClosed)
    }

    /// Close the channel. Safe to call any number of times.
    pub fn disconnect(&self) {
        self.token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled() || self.outgoing.is_closed()
    }
}

impl Drop for BridgeChannel {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run_channel<R, W>(
    reader: R,
    writer: W,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    events: mpsc::UnboundedSender<BridgeEvent>,
    token: CancellationToken,
    child: Option<Child>,
) where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut frames = FramedRead::new(reader, NativeMessageCodec::new());
    let mut sink = FramedWrite::new(writer, NativeMessageCodec::new());
    let mut pending: VecDeque<Option<oneshot::Sender<BridgeReply>>> = VecDeque::new();

    loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => {
                // Flush control messages queued right before the disconnect.
                while let Ok(Outgoing { request, .. }) = outgoing.try_recv() {
                    let Ok(value) = serde_json::to_value(&request) else {
                        continue;
                    };
                    if sink.send(value).await.is_err() {
                        break;
                    }
                }
                debug!("Bridge channel disconnected");
                break;
            }

            Some(Outgoing { request, reply }) = outgoing.recv() => {
                let kind = request.kind();
                let value = match serde_json::to_value(&request) {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(kind, error = %e, "Failed to serialize bridge request");
                        continue;
                    }
                };
                if let Err(e) = sink.send(value).await {
                    warn!(kind, error = %e, "Failed to write to bridge");
                    break;
                }
                trace!(kind, "Bridge request sent");
                pending.push_back(reply);
            }

            frame = frames.next() => {
                let value = match frame {
                    Some(Ok(value)) => value,
                    Some(Err(e)) => {
                        warn!(error = %e, "Bridge stream failed");
                        break;
                    }
                    None => {
                        debug!("Bridge closed its end of the channel");
                        break;
                    }
                };

                match Inbound::from_value(value) {
                    Ok(Inbound::Event(event)) => {
                        // Receiver may already be gone after cleanup.
                        let _ = events.send(event);
                    }
                    Ok(Inbound::Reply(reply)) => match pending.pop_front() {
                        Some(Some(tx)) => {
                            let _ = tx.send(reply);
                        }
                        Some(None) => {
                            if !reply.ok {
                                debug!(error = ?reply.error, "Bridge rejected a control request");
                            }
                        }
                        None => warn!(?reply, "Unsolicited bridge reply"),
                    },
                    Err(e) => warn!(error = %e, "Ignoring malformed bridge frame"),
                }
            }
        }
    }

    token.cancel();
    drop(pending);

    if let Some(mut child) = child {
        if let Err(e) = child.kill().await {
            debug!(error = %e, "Helper process already exited");
        }
    }
}
