//! Domain value types shared by every backend.

mod retry_policy;
mod state;

pub use retry_policy::{ErrorClass, RetryPolicy, classify, codes};
pub use state::{DownloadState, StateSet};
