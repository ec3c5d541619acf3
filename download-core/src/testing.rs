//! In-process fakes for the collaborators of a download.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use native_messaging::NativeMessageCodec;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

use crate::bridge::{BridgeChannel, BridgeConnector, BridgeEvents};
use crate::collection::DownloadCollection;
use crate::domain::DownloadState;
use crate::download::{Download, DownloadContext};
use crate::host::{HostDownloadOptions, HostDownloadService, HostSnapshot, ManId};
use crate::preroll::{PrerollOutcome, PrerollRequest, Preroller};
use crate::{Error, Result};

const WAIT_TIMEOUT: Duration = Duration::from_secs(2);

async fn wait_until<T>(mut probe: impl FnMut() -> Option<T>) -> Option<T> {
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    loop {
        if let Some(found) = probe() {
            return Some(found);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[derive(Default)]
struct HostInner {
    download_results: VecDeque<std::result::Result<ManId, String>>,
    next_id: ManId,
    downloads: Vec<HostDownloadOptions>,
    calls: Vec<String>,
    search: HashMap<ManId, Vec<HostSnapshot>>,
    fail_pause: bool,
}

/// Scriptable host download service.
pub struct FakeHost {
    inner: Mutex<HostInner>,
    supports_referrer: bool,
    download_delay: Option<Duration>,
}

impl Default for FakeHost {
    fn default() -> Self {
        Self {
            inner: Mutex::new(HostInner {
                next_id: 1,
                ..Default::default()
            }),
            supports_referrer: true,
            download_delay: None,
        }
    }
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` registrations fail with `error`.
    pub fn failing_downloads(self, count: usize, error: &str) -> Self {
        {
            let mut inner = self.inner.lock();
            for _ in 0..count {
                inner.download_results.push_back(Err(error.to_string()));
            }
        }
        self
    }

    pub fn failing_pause(self) -> Self {
        self.inner.lock().fail_pause = true;
        self
    }

    pub fn without_referrer_support(mut self) -> Self {
        self.supports_referrer = false;
        self
    }

    pub fn with_download_delay(mut self, delay: Duration) -> Self {
        self.download_delay = Some(delay);
        self
    }

    pub fn set_search(&self, id: ManId, snapshots: Vec<HostSnapshot>) {
        self.inner.lock().search.insert(id, snapshots);
    }

    pub fn downloads(&self) -> Vec<HostDownloadOptions> {
        self.inner.lock().downloads.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().calls.clone()
    }

    pub async fn wait_for_call(&self, call: &str) -> bool {
        wait_until(|| self.inner.lock().calls.iter().any(|c| c == call).then_some(()))
            .await
            .is_some()
    }
}

#[async_trait]
impl HostDownloadService for FakeHost {
    async fn download(&self, options: &HostDownloadOptions) -> Result<ManId> {
        if let Some(delay) = self.download_delay {
            tokio::time::sleep(delay).await;
        }
        let mut inner = self.inner.lock();
        inner.downloads.push(options.clone());
        match inner.download_results.pop_front() {
            Some(Err(error)) => Err(Error::host(error)),
            Some(Ok(id)) => Ok(id),
            None => {
                let id = inner.next_id;
                inner.next_id += 1;
                Ok(id)
            }
        }
    }

    async fn pause(&self, id: ManId) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.calls.push(format!("pause:{id}"));
        if inner.fail_pause {
            return Err(Error::host("cannot pause"));
        }
        Ok(())
    }

    async fn resume(&self, id: ManId) -> Result<()> {
        self.inner.lock().calls.push(format!("resume:{id}"));
        Ok(())
    }

    async fn cancel(&self, id: ManId) -> Result<()> {
        self.inner.lock().calls.push(format!("cancel:{id}"));
        Err(Error::host("already gone"))
    }

    async fn erase(&self, id: ManId) -> Result<()> {
        self.inner.lock().calls.push(format!("erase:{id}"));
        Ok(())
    }

    async fn search(&self, id: ManId) -> Result<Vec<HostSnapshot>> {
        let mut inner = self.inner.lock();
        inner.calls.push(format!("search:{id}"));
        Ok(inner.search.get(&id).cloned().unwrap_or_default())
    }

    fn supports_referrer(&self) -> bool {
        self.supports_referrer
    }
}

#[derive(Default)]
struct CollectionInner {
    changes: Vec<(DownloadState, DownloadState)>,
    man_ids: HashMap<ManId, String>,
    removed: Vec<ManId>,
    started: Vec<String>,
    dirty: usize,
}

/// Collection that records callbacks and checks every reported edge.
#[derive(Default)]
pub struct FakeCollection {
    inner: Mutex<CollectionInner>,
}

impl FakeCollection {
    pub fn changes(&self) -> Vec<(DownloadState, DownloadState)> {
        self.inner.lock().changes.clone()
    }

    pub fn man_ids(&self) -> HashMap<ManId, String> {
        self.inner.lock().man_ids.clone()
    }

    pub fn removed(&self) -> Vec<ManId> {
        self.inner.lock().removed.clone()
    }

    pub fn started(&self) -> Vec<String> {
        self.inner.lock().started.clone()
    }

    pub fn dirty_count(&self) -> usize {
        self.inner.lock().dirty
    }
}

impl DownloadCollection for FakeCollection {
    fn set_dirty(&self, _download: &Download) {
        self.inner.lock().dirty += 1;
    }

    fn changed_state(&self, download: &Download, old: DownloadState, new: DownloadState) {
        assert_ne!(old, new, "same-state change reported");
        assert!(old.can_transition_to(new), "illegal edge {old} -> {new}");
        assert_eq!(download.state(), new);
        self.inner.lock().changes.push((old, new));
    }

    fn add_man_id(&self, id: ManId, download_id: &str) {
        self.inner.lock().man_ids.insert(id, download_id.to_string());
    }

    fn remove_man_id(&self, id: ManId) {
        let mut inner = self.inner.lock();
        inner.man_ids.remove(&id);
        inner.removed.push(id);
    }

    fn start_download(&self, download_id: &str) {
        self.inner.lock().started.push(download_id.to_string());
    }
}

/// Preroller returning a fixed outcome.
pub struct FakePreroll {
    pub outcome: Option<PrerollOutcome>,
}

#[async_trait]
impl Preroller for FakePreroll {
    fn should_preroll(&self, _request: &PrerollRequest) -> bool {
        true
    }

    async fn roll(&self, _request: &PrerollRequest) -> Result<Option<PrerollOutcome>> {
        Ok(self.outcome.clone())
    }
}

#[derive(Default)]
struct BridgeState {
    requests: Vec<Value>,
    refuse: bool,
    start_reply: Option<Value>,
    move_reply: Option<Value>,
    preroll_reply: Option<Value>,
    stat_reply: Option<Value>,
    helper: Option<mpsc::UnboundedSender<Value>>,
    connections: usize,
}

impl BridgeState {
    fn reply_for(&self, request: &Value) -> Value {
        match request["type"].as_str().unwrap_or_default() {
            "download_start" => self
                .start_reply
                .clone()
                .unwrap_or_else(|| json!({"ok": true, "id": "job-1"})),
            "download_pause" | "download_resume" | "download_cancel" => {
                json!({"ok": true, "id": request["id"]})
            }
            "move" => self
                .move_reply
                .clone()
                .unwrap_or_else(|| json!({"ok": true, "path": request["dst"]})),
            "preroll" => self
                .preroll_reply
                .clone()
                .unwrap_or_else(|| json!({"ok": true, "headers": [], "status": 200})),
            "stat_path" => self
                .stat_reply
                .clone()
                .unwrap_or_else(|| json!({"ok": true, "path": request["path"]})),
            _ => json!({"ok": false, "error": "unknown type"}),
        }
    }
}

/// Bridge connector backed by an in-process helper over `tokio::io::duplex`.
#[derive(Clone, Default)]
pub struct FakeBridge {
    state: Arc<Mutex<BridgeState>>,
}

impl FakeBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse_connections(self) -> Self {
        self.state.lock().refuse = true;
        self
    }

    pub fn with_start_reply(self, reply: Value) -> Self {
        self.state.lock().start_reply = Some(reply);
        self
    }

    pub fn with_move_failure(self) -> Self {
        self.state.lock().move_reply = Some(json!({"ok": false, "error": "permission denied"}));
        self
    }

    pub fn with_stat_reply(self, reply: Value) -> Self {
        self.state.lock().stat_reply = Some(reply);
        self
    }

    pub fn with_preroll_reply(self, reply: Value) -> Self {
        self.state.lock().preroll_reply = Some(reply);
        self
    }

    pub fn connections(&self) -> usize {
        self.state.lock().connections
    }

    pub fn requests(&self) -> Vec<Value> {
        self.state.lock().requests.clone()
    }

    pub fn requests_of(&self, kind: &str) -> Vec<Value> {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r["type"] == kind)
            .cloned()
            .collect()
    }

    /// Wait until the helper received a request of `kind`.
    pub async fn wait_for(&self, kind: &str) -> Value {
        wait_until(|| self.requests_of(kind).pop())
            .await
            .unwrap_or_else(|| panic!("helper never received {kind}"))
    }

    /// Send a frame from the helper on the latest connection.
    pub fn emit(&self, frame: Value) {
        let state = self.state.lock();
        let helper = state.helper.as_ref().expect("no helper connected");
        helper.send(frame).expect("helper task is gone");
    }

    /// Make the helper hang up.
    pub fn hang_up(&self) {
        self.state.lock().helper = None;
    }
}

#[async_trait]
impl BridgeConnector for FakeBridge {
    async fn connect(&self) -> Result<(BridgeChannel, BridgeEvents)> {
        let (emit_tx, mut emit_rx) = mpsc::unbounded_channel::<Value>();
        {
            let mut state = self.state.lock();
            if state.refuse {
                return Err(Error::bridge("helper not installed"));
            }
            state.connections += 1;
            state.helper = Some(emit_tx);
        }

        let (client, helper_io) = tokio::io::duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(client);
        let shared = Arc::clone(&self.state);

        tokio::spawn(async move {
            let mut framed = Framed::new(helper_io, NativeMessageCodec::new());
            loop {
                tokio::select! {
                    frame = framed.next() => {
                        let Some(Ok(request)) = frame else { break };
                        let reply = {
                            let mut state = shared.lock();
                            let reply = state.reply_for(&request);
                            state.requests.push(request);
                            reply
                        };
                        if framed.send(reply).await.is_err() {
                            break;
                        }
                    }
                    out = emit_rx.recv() => match out {
                        Some(frame) => {
                            if framed.send(frame).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        Ok(BridgeChannel::spawn(reader, writer))
    }
}

/// Fakes wired into a context.
pub struct Harness {
    pub host: Arc<FakeHost>,
    pub collection: Arc<FakeCollection>,
    pub bridge: FakeBridge,
}

impl Harness {
    pub fn new(host: FakeHost) -> Self {
        Self {
            host: Arc::new(host),
            collection: Arc::new(FakeCollection::default()),
            bridge: FakeBridge::new(),
        }
    }

    pub fn with_bridge(mut self, bridge: FakeBridge) -> Self {
        self.bridge = bridge;
        self
    }

    /// Context without a bridge fallback.
    pub fn host_only(&self) -> DownloadContext {
        DownloadContext::new(self.host.clone(), self.collection.clone())
    }

    pub fn context(&self) -> DownloadContext {
        self.host_only()
            .with_bridge(Arc::new(self.bridge.clone()))
    }
}

/// Receive and apply the next bridge event.
pub async fn pump(download: &mut Download) {
    let event = tokio::time::timeout(WAIT_TIMEOUT, download.next_bridge_event())
        .await
        .expect("no bridge event arrived");
    match event {
        Some(event) => download.handle_bridge_event(event).await,
        None => download.handle_bridge_closed(),
    }
}
