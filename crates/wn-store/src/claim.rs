//! Claim markers.

use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};

use wn_core::ContentKey;

use crate::store::StoredEntry;

/// Result of [`crate::ContentStore::try_claim`].
#[derive(Debug)]
pub enum ClaimOutcome {
    /// The marker was created by this call; the caller owns the attempt.
    Acquired(Claim),
    /// A marker already exists: another attempt is in flight (or crashed).
    Held,
    /// The entry was finalized by someone else before the claim landed.
    Stored(StoredEntry),
}

impl ClaimOutcome {
    pub fn acquired(&self) -> bool {
        matches!(self, ClaimOutcome::Acquired(_))
    }
}

/// Exclusive reservation of a content key.
///
/// Consumed by [`crate::ContentStore::finalize`] or
/// [`crate::ContentStore::abandon`]. A claim dropped without either removes
/// its marker, so an unwinding or canceled caller cannot leave one behind.
///
/// The claim keeps the marker it created open. Finalize, abandon and drop
/// only touch the path while it still names that same file, so a marker
/// that was deleted and re-created by someone else is left alone.
#[derive(Debug)]
pub struct Claim {
    key: ContentKey,
    path: PathBuf,
    entry_path: PathBuf,
    #[cfg(unix)]
    marker: std::fs::File,
    released: bool,
}

impl Claim {
    pub(crate) fn new(
        key: ContentKey,
        path: PathBuf,
        entry_path: PathBuf,
        marker: std::fs::File,
    ) -> Self {
        #[cfg(not(unix))]
        drop(marker);
        Self {
            key,
            path,
            entry_path,
            #[cfg(unix)]
            marker,
            released: false,
        }
    }

    pub fn key(&self) -> &ContentKey {
        &self.key
    }

    /// The marker path. The attempt writes its output here.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn entry_path(&self) -> &Path {
        &self.entry_path
    }

    /// Mark the marker as handled so drop leaves the filesystem alone.
    pub(crate) fn release(&mut self) {
        self.released = true;
    }

    /// Whether the marker path still names the file this claim created.
    pub(crate) async fn owns_marker(&self) -> io::Result<bool> {
        self.matches(tokio::fs::symlink_metadata(&self.path).await)
    }

    fn owns_marker_blocking(&self) -> io::Result<bool> {
        self.matches(std::fs::symlink_metadata(&self.path))
    }

    fn matches(&self, on_disk: io::Result<Metadata>) -> io::Result<bool> {
        let on_disk = match on_disk {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            let ours = self.marker.metadata()?;
            Ok(on_disk.dev() == ours.dev() && on_disk.ino() == ours.ino())
        }
        #[cfg(not(unix))]
        {
            let _ = on_disk;
            Ok(true)
        }
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match self.owns_marker_blocking() {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                tracing::error!(file_id = %self.key, "cannot check dropped claim marker: {e}");
                return;
            }
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::warn!(
                file_id = %self.key,
                "claim dropped without finalize or abandon; marker removed"
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::error!(
                file_id = %self.key,
                path = %self.path.display(),
                "failed to remove dropped claim marker: {e}"
            ),
        }
    }
}
