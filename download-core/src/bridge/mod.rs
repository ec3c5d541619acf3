//! Native bridge backend.
//!
//! The bridge is an external helper process reached over a framed
//! bidirectional channel. [`protocol`] defines the messages, [`channel`] owns
//! the stream and [`connector`] opens it.

pub mod channel;
pub mod connector;
pub mod protocol;

pub use channel::{BridgeChannel, BridgeEvents};
pub use connector::{BridgeConnector, ProcessBridgeConnector};
pub use protocol::{
    BridgeEvent, BridgeReply, BridgeRequest, DoneEvent, DownloadStart, PrerollQuery, StatPath,
};
