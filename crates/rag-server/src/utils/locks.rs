use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Per-document mutual exclusion keyed by lowercased path.
///
/// Waiters queue FIFO (tokio semaphores are fair). A watchdog force-releases
/// a lock held past `hold_timeout` so one stuck ingestion cannot wedge a
/// path forever.
pub struct DocumentLockManager {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
    hold_timeout: Duration,
}

/// Releases the lock on drop. If the watchdog already force-released it,
/// the drop is a no-op.
pub struct DocumentLockGuard {
    semaphore: Arc<Semaphore>,
    released: Arc<AtomicBool>,
    key: String,
}

impl Drop for DocumentLockGuard {
    fn drop(&mut self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.semaphore.add_permits(1);
            debug!("Released document lock for {}", self.key);
        }
    }
}

impl DocumentLockManager {
    pub fn new(hold_timeout: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            hold_timeout,
        }
    }

    fn semaphore_for(&self, key: &str) -> Arc<Semaphore> {
        let mut locks = self.locks.lock();
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone()
    }

    /// Acquire the lock for `path`, waiting behind earlier acquirers.
    pub async fn acquire(&self, path: &str) -> DocumentLockGuard {
        let key = path.to_lowercase();
        let semaphore = self.semaphore_for(&key);

        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("document lock semaphore closed");
        // Release is managed manually so the watchdog can take over.
        permit.forget();

        debug!("Acquired document lock for {}", key);
        self.spawn_watchdog(&key, semaphore.clone())
    }

    /// Non-blocking acquire. Returns `None` if the lock is held.
    pub fn try_acquire(&self, path: &str) -> Option<DocumentLockGuard> {
        let key = path.to_lowercase();
        let semaphore = self.semaphore_for(&key);

        match semaphore.clone().try_acquire_owned() {
            Ok(permit) => {
                permit.forget();
                debug!("Acquired document lock for {} (try)", key);
                Some(self.spawn_watchdog(&key, semaphore))
            }
            Err(_) => None,
        }
    }

    fn spawn_watchdog(&self, key: &str, semaphore: Arc<Semaphore>) -> DocumentLockGuard {
        let released = Arc::new(AtomicBool::new(false));

        let watchdog_released = released.clone();
        let watchdog_sem = semaphore.clone();
        let watchdog_key = key.to_string();
        let timeout = self.hold_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if !watchdog_released.swap(true, Ordering::SeqCst) {
                warn!(
                    "Document lock for {} held past {:?}, force-releasing",
                    watchdog_key, timeout
                );
                watchdog_sem.add_permits(1);
            }
        });

        DocumentLockGuard {
            semaphore,
            released,
            key: key.to_string(),
        }
    }
}
