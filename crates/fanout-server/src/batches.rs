//! Playback batch tracking and temp-file cleanup.
//!
//! A batch correlates one client request (one device, all devices, or N
//! files on N devices) with the sessions it started and the spooled temp
//! files it owns. Ending a batch cascades to unlinking every owned file.
//! A background sweep force-ends batches past an age threshold so spooled
//! uploads are never leaked by a client that walks away — the sweep only
//! reclaims files and tracking entries, it never stops a session.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use uuid::Uuid;

struct BatchEntry {
    started: Instant,
    temp_files: Vec<PathBuf>,
    devices: Vec<usize>,
}

/// Mutex-backed registry of active batches.
///
/// Explicitly constructed and handed around by clone; there is no global
/// store.
#[derive(Clone)]
pub struct BatchTracker {
    inner: Arc<Mutex<HashMap<String, BatchEntry>>>,
    max_age: Duration,
}

impl BatchTracker {
    pub fn new(max_age: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            max_age,
        }
    }

    /// Register a batch and return its opaque id.
    pub fn begin(&self, temp_files: Vec<PathBuf>, devices: Vec<usize>) -> String {
        let id = Uuid::new_v4().to_string();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.insert(
            id.clone(),
            BatchEntry {
                started: Instant::now(),
                temp_files,
                devices,
            },
        );
        tracing::debug!(batch_id = %id, "batch started");
        id
    }

    /// End one batch: unlink its temp files (best-effort) and drop the
    /// entry. Returns the batch's device indices, or `None` when the id is
    /// unknown (already ended — not an error).
    pub fn end(&self, id: &str) -> Option<Vec<usize>> {
        let entry = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.remove(id)?
        };
        unlink_all(&entry.temp_files);
        tracing::debug!(batch_id = %id, "batch ended");
        Some(entry.devices)
    }

    /// End every tracked batch. Returns how many were ended. Individual
    /// unlink failures are logged and never propagate.
    pub fn end_all(&self) -> usize {
        let drained: Vec<(String, BatchEntry)> = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.drain().collect()
        };
        for (_, entry) in &drained {
            unlink_all(&entry.temp_files);
        }
        drained.len()
    }

    /// Force-end batches older than the configured age threshold.
    pub fn sweep_expired(&self) -> usize {
        let expired: Vec<String> = {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner
                .iter()
                .filter(|(_, e)| e.started.elapsed() > self.max_age)
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in &expired {
            self.end(id);
        }
        expired.len()
    }

    /// Number of tracked batches.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Best-effort unlink of a set of spooled files.
pub fn unlink_all(paths: &[PathBuf]) {
    for path in paths {
        match std::fs::remove_file(path) {
            Ok(()) => {}
            // A file someone else already removed is fine.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to unlink temp file");
            }
        }
    }
}

/// Spawn the background sweep thread.
pub fn spawn_sweeper(tracker: BatchTracker, interval: Duration) {
    thread::spawn(move || {
        loop {
            thread::sleep(interval);
            let ended = tracker.sweep_expired();
            if ended > 0 {
                tracing::info!(count = ended, "swept expired batches");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "fanout-batch-test-{}-{}",
            name,
            Uuid::new_v4()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("payload.wav");
        std::fs::write(&path, b"stub").unwrap();
        path
    }

    #[test]
    fn end_unlinks_owned_files_and_returns_devices() {
        let tracker = BatchTracker::new(Duration::from_secs(600));
        let path = temp_file("end");
        let id = tracker.begin(vec![path.clone()], vec![0, 2]);

        let devices = tracker.end(&id).unwrap();
        assert_eq!(devices, vec![0, 2]);
        assert!(!path.exists());
        assert!(tracker.is_empty());
    }

    #[test]
    fn end_unknown_id_is_none_not_error() {
        let tracker = BatchTracker::new(Duration::from_secs(600));
        assert!(tracker.end("no-such-batch").is_none());
    }

    #[test]
    fn end_tolerates_already_missing_files() {
        let tracker = BatchTracker::new(Duration::from_secs(600));
        let path = temp_file("missing");
        let id = tracker.begin(vec![path.clone()], vec![1]);
        std::fs::remove_file(&path).unwrap();

        assert!(tracker.end(&id).is_some());
    }

    #[test]
    fn end_all_drains_everything() {
        let tracker = BatchTracker::new(Duration::from_secs(600));
        let a = temp_file("all-a");
        let b = temp_file("all-b");
        tracker.begin(vec![a.clone()], vec![0]);
        tracker.begin(vec![b.clone()], vec![1]);

        assert_eq!(tracker.end_all(), 2);
        assert!(!a.exists());
        assert!(!b.exists());
        assert!(tracker.is_empty());
    }

    #[test]
    fn sweep_ends_only_expired_batches() {
        let tracker = BatchTracker::new(Duration::from_millis(20));
        let old = temp_file("sweep-old");
        tracker.begin(vec![old.clone()], vec![0]);

        thread::sleep(Duration::from_millis(40));
        let young = temp_file("sweep-young");
        let young_id = tracker.begin(vec![young.clone()], vec![1]);

        assert_eq!(tracker.sweep_expired(), 1);
        assert!(!old.exists());
        assert!(young.exists());
        assert_eq!(tracker.len(), 1);

        tracker.end(&young_id);
    }
}
