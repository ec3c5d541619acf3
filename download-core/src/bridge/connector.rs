//! Opening bridge channels.

use async_trait::async_trait;
use process_utils::StdioCommand;
use tracing::{debug, info};

use super::channel::{BridgeChannel, BridgeEvents};
use crate::{Error, Result};

/// Opens a fresh channel to the native helper.
#[async_trait]
pub trait BridgeConnector: Send + Sync {
    async fn connect(&self) -> Result<(BridgeChannel, BridgeEvents)>;
}

/// Launches the helper program and talks to it over its stdio.
#[derive(Debug, Clone)]
pub struct ProcessBridgeConnector {
    command: StdioCommand,
}

impl ProcessBridgeConnector {
    pub fn new(command: StdioCommand) -> Self {
        Self { command }
    }
}

#[async_trait]
impl BridgeConnector for ProcessBridgeConnector {
    async fn connect(&self) -> Result<(BridgeChannel, BridgeEvents)> {
        let program = self.command.program().to_string_lossy().into_owned();
        debug!(program = %program, "Launching native helper");

        let helper = self
            .command
            .spawn()
            .map_err(|e| Error::bridge(format!("failed to launch {program}: {e}")))?;

        info!(program = %program, pid = ?helper.child.id(), "Native helper started");
        Ok(BridgeChannel::spawn_with_child(helper))
    }
}
