//! Coalescing access tracker.
//!
//! Retrieval marks graph objects as recently used, but the search path must
//! never wait on that bookkeeping. `schedule` pushes into a bounded channel
//! and returns immediately (overflow drops with a warning); a detached
//! worker coalesces arrivals over a short window and issues one bulk UPDATE
//! per project per window.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use lattice_config::AccessTrackingConfig;
use lattice_core::traits::AccessStamper;

struct AccessBatch {
    project_id: Uuid,
    ids: Vec<Uuid>,
}

#[derive(Clone)]
pub struct AccessTracker {
    tx: mpsc::Sender<AccessBatch>,
}

impl AccessTracker {
    /// Spawn the worker task and hand back the scheduling handle. The worker
    /// lives until every handle is dropped.
    pub fn spawn(stamper: Arc<dyn AccessStamper>, config: &AccessTrackingConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let window = Duration::from_millis(config.coalesce_window_ms);
        tokio::spawn(run_worker(rx, stamper, window));
        AccessTracker { tx }
    }

    /// Non-blocking: enqueue ids for stamping. A full buffer drops the batch
    /// rather than backpressuring the search path.
    pub fn schedule(&self, project_id: Uuid, ids: Vec<Uuid>) {
        if ids.is_empty() {
            return;
        }
        let count = ids.len();
        if self.tx.try_send(AccessBatch { project_id, ids }).is_err() {
            warn!(%project_id, count, "access tracking buffer full, dropping batch");
        }
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<AccessBatch>,
    stamper: Arc<dyn AccessStamper>,
    window: Duration,
) {
    while let Some(first) = rx.recv().await {
        let mut pending: HashMap<Uuid, HashSet<Uuid>> = HashMap::new();
        pending
            .entry(first.project_id)
            .or_default()
            .extend(first.ids);

        // Keep absorbing until the window closes or the channel drains shut.
        let deadline = Instant::now() + window;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(batch)) => {
                    pending
                        .entry(batch.project_id)
                        .or_default()
                        .extend(batch.ids);
                }
                Ok(None) | Err(_) => break,
            }
        }

        for (project_id, ids) in pending {
            let ids: Vec<Uuid> = ids.into_iter().collect();
            match stamper.update_access_timestamps(project_id, &ids).await {
                Ok(stamped) => {
                    debug!(%project_id, stamped, "flushed access timestamps");
                }
                Err(error) => {
                    warn!(%project_id, %error, "access timestamp flush failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lattice_core::error::{Error, Result};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingStamper {
        calls: Mutex<Vec<(Uuid, Vec<Uuid>)>>,
        fail: bool,
    }

    #[async_trait]
    impl AccessStamper for RecordingStamper {
        async fn update_access_timestamps(&self, project_id: Uuid, ids: &[Uuid]) -> Result<u64> {
            if self.fail {
                return Err(Error::RetryableIo("stamper down".to_string()));
            }
            let mut sorted = ids.to_vec();
            sorted.sort();
            self.calls.lock().unwrap().push((project_id, sorted));
            Ok(ids.len() as u64)
        }
    }

    fn config(window_ms: u64, capacity: usize) -> AccessTrackingConfig {
        AccessTrackingConfig {
            coalesce_window_ms: window_ms,
            queue_capacity: capacity,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn coalesces_batches_within_the_window() {
        let stamper = Arc::new(RecordingStamper::default());
        let tracker = AccessTracker::spawn(stamper.clone(), &config(100, 64));

        let project = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        tracker.schedule(project, vec![a, b]);
        tracker.schedule(project, vec![b]);
        tracker.schedule(project, vec![a]);

        // Let the window elapse and the flush land.
        tokio::time::sleep(Duration::from_millis(250)).await;

        let calls = stamper.calls.lock().unwrap();
        assert_eq!(calls.len(), 1, "window should coalesce into one flush");
        let (flushed_project, ids) = &calls[0];
        assert_eq!(*flushed_project, project);
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(*ids, expected, "duplicate ids collapse");
    }

    #[tokio::test(start_paused = true)]
    async fn separate_projects_flush_separately() {
        let stamper = Arc::new(RecordingStamper::default());
        let tracker = AccessTracker::spawn(stamper.clone(), &config(100, 64));

        let project_a = Uuid::new_v4();
        let project_b = Uuid::new_v4();
        tracker.schedule(project_a, vec![Uuid::new_v4()]);
        tracker.schedule(project_b, vec![Uuid::new_v4()]);

        tokio::time::sleep(Duration::from_millis(250)).await;

        let calls = stamper.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        let projects: HashSet<Uuid> = calls.iter().map(|(p, _)| *p).collect();
        assert!(projects.contains(&project_a) && projects.contains(&project_b));
    }

    #[tokio::test(start_paused = true)]
    async fn stamper_failure_never_propagates() {
        let stamper = Arc::new(RecordingStamper {
            fail: true,
            ..Default::default()
        });
        let tracker = AccessTracker::spawn(stamper, &config(50, 64));

        tracker.schedule(Uuid::new_v4(), vec![Uuid::new_v4()]);
        tokio::time::sleep(Duration::from_millis(200)).await;
        // Reaching this point without panicking is the assertion.
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_never_blocks_on_a_full_buffer() {
        let stamper = Arc::new(RecordingStamper::default());
        let tracker = AccessTracker::spawn(stamper, &config(10_000, 1));

        // Far more batches than capacity; the extras are dropped silently.
        for _ in 0..50 {
            tracker.schedule(Uuid::new_v4(), vec![Uuid::new_v4()]);
        }

        tracker.schedule(Uuid::new_v4(), vec![]);
    }
}
