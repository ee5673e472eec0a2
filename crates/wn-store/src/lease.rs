//! Process-level lease on a store directory.
//!
//! Every process serving from a store holds a shared `flock` on
//! `<root>/.wavnorm.lock` for as long as the store is open. Startup recovery
//! needs the lock exclusively, so it only runs when no other live process
//! could own a marker in the directory.

use std::future::Future;
use std::path::Path;

#[cfg(unix)]
use std::fs::File;
#[cfg(unix)]
use std::sync::Mutex;

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::fcntl::{Flock, FlockArg};

/// Name of the lock file inside the store root.
pub const LOCK_FILE: &str = ".wavnorm.lock";

#[cfg(unix)]
pub(crate) struct StoreLease {
    // `None` only while the lock mode is being switched.
    lock: Mutex<Option<Flock<File>>>,
}

#[cfg(unix)]
impl std::fmt::Debug for StoreLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreLease").finish_non_exhaustive()
    }
}

#[cfg(unix)]
impl StoreLease {
    /// Open the lock file under `root` and take the shared lock.
    pub(crate) async fn acquire(root: &Path) -> wn_core::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(root.join(LOCK_FILE))?;
        let lock = lock_shared(file).await?;
        Ok(Self {
            lock: Mutex::new(Some(lock)),
        })
    }

    /// Run `work` while holding the lock exclusively.
    ///
    /// Returns `Ok(None)` without running `work` when another process holds
    /// the lease. The shared lock is taken back afterwards in either case.
    pub(crate) async fn with_exclusive<T, F, Fut>(&self, work: F) -> wn_core::Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = wn_core::Result<T>>,
    {
        let shared = self.take()?;
        let file = shared.unlock().map_err(|(_, errno)| std::io::Error::from(errno))?;

        let (file, outcome) = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(exclusive) => {
                let outcome = work().await;
                let file = exclusive
                    .unlock()
                    .map_err(|(_, errno)| std::io::Error::from(errno))?;
                (file, outcome.map(Some))
            }
            Err((file, errno)) if errno == Errno::EWOULDBLOCK => (file, Ok(None)),
            Err((_, errno)) => return Err(std::io::Error::from(errno).into()),
        };

        let shared = lock_shared(file).await?;
        self.put(shared);
        outcome
    }

    fn take(&self) -> wn_core::Result<Flock<File>> {
        self.lock
            .lock()
            .map_err(|_| wn_core::Error::Internal("store lease mutex poisoned".into()))?
            .take()
            .ok_or_else(|| wn_core::Error::Internal("store lease is being switched".into()))
    }

    fn put(&self, lock: Flock<File>) {
        if let Ok(mut slot) = self.lock.lock() {
            *slot = Some(lock);
        }
    }
}

/// Blocking shared lock, waited for off the runtime. Only blocks while
/// another process is recovering.
#[cfg(unix)]
async fn lock_shared(file: File) -> wn_core::Result<Flock<File>> {
    tokio::task::spawn_blocking(move || Flock::lock(file, FlockArg::LockShared))
        .await
        .map_err(|e| wn_core::Error::Internal(format!("store lock task failed: {e}")))?
        .map_err(|(_, errno)| std::io::Error::from(errno).into())
}

#[cfg(not(unix))]
#[derive(Debug)]
pub(crate) struct StoreLease;

#[cfg(not(unix))]
impl StoreLease {
    pub(crate) async fn acquire(_root: &Path) -> wn_core::Result<Self> {
        Ok(Self)
    }

    pub(crate) async fn with_exclusive<T, F, Fut>(&self, work: F) -> wn_core::Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = wn_core::Result<T>>,
    {
        work().await.map(Some)
    }
}
