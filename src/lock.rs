use std::path::{Path, PathBuf};
use std::time::Duration;

const MAX_TRIES: u32 = 2000;
const RETRY_SLEEP: Duration = Duration::from_millis(10);

/// Cross-process mutual exclusion over a named resource, implemented as
/// exclusive directory creation with bounded retry. `std::fs::create_dir`
/// is atomic at the filesystem level, so this is safe to race against a
/// sibling process, unlike an in-process `Mutex`.
pub struct DirLock {
    path: PathBuf,
}

impl DirLock {
    /// Blocks (via async sleeps) up to `MAX_TRIES * RETRY_SLEEP` waiting to
    /// acquire the lock directory `<resource>.lock`.
    pub async fn acquire(resource: &Path) -> std::io::Result<Self> {
        let lock_path = lock_path_for(resource);
        for attempt in 0..MAX_TRIES {
            match std::fs::create_dir(&lock_path) {
                Ok(()) => return Ok(Self { path: lock_path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if attempt + 1 == MAX_TRIES {
                        return Err(e);
                    }
                    tokio::time::sleep(RETRY_SLEEP).await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "lock acquisition exhausted retries"))
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir(&self.path);
    }
}

fn lock_path_for(resource: &Path) -> PathBuf {
    let mut name = resource.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}
