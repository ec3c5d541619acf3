//! Download state machine.
//!
//! [`Download`] holds one download's state and drives it through the
//! transition table of [`DownloadState`]. Backend selection, bridge event
//! handling and resource cleanup live in sibling modules as further
//! `impl Download` blocks.

mod actor;
mod backend;
mod entity;
mod events;
pub mod request;
mod selector;
mod snapshot;

pub use actor::{
    ActorOutcome, DEFAULT_MAILBOX_CAPACITY, DownloadActor, DownloadCommand, DownloadHandle,
};
pub use backend::{Backend, BridgeLink};
pub use entity::{Download, DownloadContext, DownloadRequest};
pub use request::{CORRELATION_HEADER, Header, REFERER_HEADER, TransferRequest};
pub use snapshot::DownloadSnapshot;
