//! Contract of the manager that owns a set of downloads.

use crate::domain::DownloadState;
use crate::download::Download;
use crate::host::ManId;

/// Callbacks from a download to the collection that owns it.
///
/// Implementations must not call back into the download synchronously.
pub trait DownloadCollection: Send + Sync {
    /// Schedule persistence and redraw.
    fn set_dirty(&self, download: &Download);

    /// Called exactly once per effective state change.
    fn changed_state(&self, download: &Download, old: DownloadState, new: DownloadState);

    /// Map a host service id to a download.
    fn add_man_id(&self, id: ManId, download_id: &str);

    fn remove_man_id(&self, id: ManId);

    /// Offer the download to `start` again.
    fn start_download(&self, download_id: &str);
}
