//! Per-path mutual exclusion for record and index files.
//!
//! Every read or write of a data file holds the [`FileGuard`] for that path
//! for its full duration. Guards release on drop, so error paths and
//! cancelled futures cannot leak a lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockTable = HashMap<PathBuf, Arc<AsyncMutex<()>>>;

/// Table of per-path locks. Entries exist only while a guard is held or awaited.
#[derive(Debug, Clone, Default)]
pub struct FileLocks {
    table: Arc<Mutex<LockTable>>,
}

impl FileLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `path`.
    pub async fn acquire(&self, path: &Path) -> FileGuard {
        let entry = {
            let mut table = lock_table(&self.table);
            let lock = table
                .entry(path.to_path_buf())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone();
            TableEntry {
                path: path.to_path_buf(),
                lock,
                table: Arc::clone(&self.table),
            }
        };

        // A cancelled wait drops `entry`, which prunes the path if it was the last user.
        let guard = Arc::clone(&entry.lock).lock_owned().await;
        FileGuard {
            _guard: guard,
            entry,
        }
    }

    /// Number of paths currently held or awaited.
    pub fn active(&self) -> usize {
        lock_table(&self.table).len()
    }
}

fn lock_table(table: &Mutex<LockTable>) -> MutexGuard<'_, LockTable> {
    // The table holds no invariants a panicking holder could break.
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One holder's or waiter's reference to a table entry.
#[derive(Debug)]
struct TableEntry {
    path: PathBuf,
    lock: Arc<AsyncMutex<()>>,
    table: Arc<Mutex<LockTable>>,
}

impl Drop for TableEntry {
    fn drop(&mut self) {
        let mut table = lock_table(&self.table);
        // Only the table and this entry still reference the lock.
        let idle = table
            .get(&self.path)
            .is_some_and(|lock| Arc::ptr_eq(lock, &self.lock))
            && Arc::strong_count(&self.lock) == 2;
        if idle {
            table.remove(&self.path);
        }
    }
}

/// Exclusive access to one path.
#[derive(Debug)]
pub struct FileGuard {
    // Declared first: the mutex is released before the entry is pruned.
    _guard: OwnedMutexGuard<()>,
    entry: TableEntry,
}

impl FileGuard {
    pub fn path(&self) -> &Path {
        &self.entry.path
    }

    /// Release explicitly. Equivalent to dropping the guard.
    pub fn release(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_guard_released_on_drop() {
        let locks = FileLocks::new();
        let path = Path::new("/data/user_a.json");

        let guard = locks.acquire(path).await;
        assert_eq!(guard.path(), path);
        assert_eq!(locks.active(), 1);

        guard.release();
        assert_eq!(locks.active(), 0);

        // Re-acquiring after release must not block.
        let _again = tokio::time::timeout(Duration::from_secs(1), locks.acquire(path))
            .await
            .expect("lock should be free");
    }

    #[tokio::test]
    async fn test_distinct_paths_do_not_contend() {
        let locks = FileLocks::new();
        let _a = locks.acquire(Path::new("/data/a.json")).await;
        let b = tokio::time::timeout(
            Duration::from_secs(1),
            locks.acquire(Path::new("/data/b.json")),
        )
        .await;
        assert!(b.is_ok());
        assert_eq!(locks.active(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_path_is_exclusive() {
        let locks = FileLocks::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = Arc::clone(&inside);
            let max_seen = Arc::clone(&max_seen);
            tasks.push(tokio::spawn(async move {
                let _guard = locks.acquire(Path::new("/data/shared.json")).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_releases_entry() {
        let locks = FileLocks::new();
        let path = Path::new("/data/user_b.json");
        let held = locks.acquire(path).await;

        let waited = tokio::time::timeout(Duration::from_millis(20), locks.acquire(path)).await;
        assert!(waited.is_err());

        drop(held);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_waiter_cancelled_after_holder_releases_entry() {
        let locks = FileLocks::new();
        let path = Path::new("/data/user_c.json");
        let held = locks.acquire(path).await;

        let mut waiter = Box::pin(locks.acquire(path));
        let waited = tokio::time::timeout(Duration::from_millis(20), waiter.as_mut()).await;
        assert!(waited.is_err());

        // The queued waiter still references the entry when the holder leaves.
        drop(held);
        assert_eq!(locks.active(), 1);

        drop(waiter);
        assert_eq!(locks.active(), 0);

        let _again = tokio::time::timeout(Duration::from_secs(1), locks.acquire(path))
            .await
            .expect("lock should be free");
    }
}
