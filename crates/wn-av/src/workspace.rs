//! Scratch workspace for a single transcode attempt.
//!
//! A [`Workspace`] materializes the uploaded bytes as a file the transcoder
//! can read. The file is named after the content key and source extension,
//! so concurrent jobs for different content never collide, and it is removed
//! when the workspace is dropped, whatever the outcome of the attempt.

use std::path::Path;

use tempfile::TempPath;
use wn_core::ContentKey;

/// Scratch input for one attempt. Removed on drop.
#[derive(Debug)]
pub struct Workspace {
    input: TempPath,
}

impl Workspace {
    /// Write `payload` to `<scratch_dir>/<key><extension>`.
    ///
    /// `extension` includes the leading dot. The directory is created if
    /// missing.
    pub async fn materialize(
        scratch_dir: &Path,
        key: &ContentKey,
        extension: &str,
        payload: &[u8],
    ) -> wn_core::Result<Self> {
        let to_error = || wn_core::Error::job_io("scratch input");

        tokio::fs::create_dir_all(scratch_dir)
            .await
            .map_err(to_error())?;

        let path = scratch_dir.join(format!("{key}{extension}"));
        // Take ownership before writing so a failed write still cleans up.
        let input = TempPath::from_path(path);
        tokio::fs::write(&input, payload).await.map_err(to_error())?;

        Ok(Self { input })
    }

    /// The scratch input path.
    pub fn input(&self) -> &Path {
        &self.input
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn materialize_writes_keyed_file() {
        let dir = tempfile::tempdir().unwrap();
        let key = ContentKey::of(b"RIFF");
        let ws = Workspace::materialize(dir.path(), &key, ".wav", b"RIFF")
            .await
            .unwrap();

        assert_eq!(ws.input(), dir.path().join(format!("{key}.wav")));
        assert_eq!(fs::read(ws.input()).unwrap(), b"RIFF");
    }

    #[tokio::test]
    async fn drop_removes_input() {
        let dir = tempfile::tempdir().unwrap();
        let key = ContentKey::of(b"ID3");
        let ws = Workspace::materialize(dir.path(), &key, ".mp3", b"ID3")
            .await
            .unwrap();
        let path = ws.input().to_path_buf();
        assert!(path.exists());

        drop(ws);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn unusable_scratch_dir_is_a_job_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("scratch");
        fs::write(&blocker, b"not a directory").unwrap();

        let key = ContentKey::of(b"x");
        let err = Workspace::materialize(&blocker, &key, ".wav", b"x")
            .await
            .unwrap_err();
        assert!(
            matches!(err, wn_core::Error::JobIo { stage: "scratch input", .. }),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn creates_missing_scratch_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("scratch").join("inputs");
        let key = ContentKey::of(b"x");
        let ws = Workspace::materialize(&nested, &key, ".wav", b"x")
            .await
            .unwrap();
        assert!(ws.input().starts_with(&nested));
    }
}
