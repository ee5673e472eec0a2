//! The content store.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::fs;
use wn_core::ContentKey;

use crate::claim::{Claim, ClaimOutcome};
use crate::lease::StoreLease;

/// Extension of finalized entries.
const ENTRY_EXT: &str = ".wav";

/// Suffix appended to the entry name to form the claim marker name.
const CLAIM_SUFFIX: &str = ".tmp";

/// A finalized, immutable entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredEntry {
    pub key: ContentKey,
    pub path: PathBuf,
    pub file_name: String,
    pub size_bytes: u64,
}

/// Content-addressed store rooted at a directory.
///
/// Several processes may serve from the same directory. Each open store
/// holds a shared lease on it until the last clone is dropped.
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
    lease: Arc<StoreLease>,
}

impl ContentStore {
    /// Open (creating if needed) a store rooted at `root` and take the
    /// shared lease.
    pub async fn open(root: impl Into<PathBuf>) -> wn_core::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        let lease = Arc::new(StoreLease::acquire(&root).await?);
        Ok(Self { root, lease })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File name of the entry for `key`.
    pub fn entry_name(key: &ContentKey) -> String {
        format!("{key}{ENTRY_EXT}")
    }

    pub fn entry_path(&self, key: &ContentKey) -> PathBuf {
        self.root.join(Self::entry_name(key))
    }

    pub fn claim_path(&self, key: &ContentKey) -> PathBuf {
        self.root
            .join(format!("{}{CLAIM_SUFFIX}", Self::entry_name(key)))
    }

    /// Whether a finalized entry exists for `key`.
    pub async fn exists(&self, key: &ContentKey) -> wn_core::Result<bool> {
        Ok(self.entry(key).await?.is_some())
    }

    /// Metadata of the finalized entry for `key`, if any. Only a regular file
    /// counts as an entry.
    pub async fn entry(&self, key: &ContentKey) -> wn_core::Result<Option<StoredEntry>> {
        let path = self.entry_path(key);
        match fs::metadata(&path).await {
            Ok(meta) if !meta.is_file() => Ok(None),
            Ok(meta) => Ok(Some(StoredEntry {
                key: key.clone(),
                file_name: Self::entry_name(key),
                path,
                size_bytes: meta.len(),
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether a claim marker currently exists for `key`.
    pub async fn claim_held(&self, key: &ContentKey) -> wn_core::Result<bool> {
        Ok(fs::try_exists(self.claim_path(key)).await?)
    }

    /// Try to reserve `key` by exclusively creating its marker.
    ///
    /// An existing marker is reported as [`ClaimOutcome::Held`], not as an
    /// error. After the marker lands the entry is checked again: if another
    /// attempt finalized in between, the marker is removed and
    /// [`ClaimOutcome::Stored`] is returned, so a finalized entry is never
    /// overwritten.
    pub async fn try_claim(&self, key: &ContentKey) -> wn_core::Result<ClaimOutcome> {
        let path = self.claim_path(key);

        let marker = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file.into_std().await,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                tracing::debug!(file_id = %key, "claim already held");
                return Ok(ClaimOutcome::Held);
            }
            Err(e) => return Err(e.into()),
        };

        let claim = Claim::new(key.clone(), path, self.entry_path(key), marker);

        if let Some(entry) = self.entry(key).await? {
            tracing::debug!(file_id = %key, "entry finalized while claiming");
            self.abandon(claim).await;
            return Ok(ClaimOutcome::Stored(entry));
        }

        tracing::debug!(file_id = %key, "claim acquired");
        Ok(ClaimOutcome::Acquired(claim))
    }

    /// Promote the claim's marker to the finalized entry.
    ///
    /// On failure the claim is abandoned before the error is returned. A
    /// marker that no longer is the one this claim created is neither
    /// promoted nor removed.
    pub async fn finalize(&self, mut claim: Claim) -> wn_core::Result<StoredEntry> {
        match claim.owns_marker().await {
            Ok(true) => {}
            Ok(false) => {
                tracing::error!(file_id = %claim.key(), "claim marker was removed or replaced");
                claim.release();
                return Err(std::io::Error::other(format!(
                    "claim marker for {} was removed or replaced",
                    claim.key()
                ))
                .into());
            }
            Err(e) => {
                tracing::error!(file_id = %claim.key(), "cannot check claim marker: {e}");
                self.abandon(claim).await;
                return Err(e.into());
            }
        }

        if let Err(e) = fs::rename(claim.path(), claim.entry_path()).await {
            tracing::error!(file_id = %claim.key(), "finalize failed: {e}");
            self.abandon(claim).await;
            return Err(e.into());
        }
        claim.release();

        let key = claim.key().clone();
        tracing::debug!(file_id = %key, "entry finalized");

        self.entry(&key).await?.ok_or_else(|| {
            wn_core::Error::Internal(format!("entry {key} vanished right after finalize"))
        })
    }

    /// Remove the claim's marker. A marker that is already gone is fine;
    /// other failures are logged.
    pub async fn abandon(&self, mut claim: Claim) {
        match claim.owns_marker().await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(file_id = %claim.key(), "claim marker already gone or replaced");
                claim.release();
                return;
            }
            Err(e) => {
                tracing::error!(file_id = %claim.key(), "cannot check claim marker: {e}");
                claim.release();
                return;
            }
        }
        match fs::remove_file(claim.path()).await {
            Ok(()) => tracing::debug!(file_id = %claim.key(), "claim abandoned"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::error!(
                file_id = %claim.key(),
                path = %claim.path().display(),
                "failed to remove claim marker: {e}"
            ),
        }
        claim.release();
    }

    /// Remove every claim marker in the store.
    ///
    /// Call before this process serves any request. Runs only when no other
    /// process holds the store lease, since then every marker was left by a
    /// process that died mid-attempt. Finalized entries are untouched.
    ///
    /// Returns the number of markers removed, or `None` when another process
    /// shares the store and recovery was skipped.
    pub async fn recover_orphaned_claims(&self) -> wn_core::Result<Option<usize>> {
        self.lease
            .with_exclusive(|| self.remove_all_markers())
            .await
    }

    async fn remove_all_markers(&self) -> wn_core::Result<usize> {
        let suffix = format!("{ENTRY_EXT}{CLAIM_SUFFIX}");
        let mut removed = 0;
        let mut dir = fs::read_dir(&self.root).await?;

        while let Some(dirent) = dir.next_entry().await? {
            let name = dirent.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !name.ends_with(&suffix) {
                continue;
            }
            match fs::remove_file(dirent.path()).await {
                Ok(()) => {
                    tracing::info!(marker = %name, "removed orphaned claim");
                    removed += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(removed)
    }
}
