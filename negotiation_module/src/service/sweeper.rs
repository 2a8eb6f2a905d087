//! Background sweep thread: expiry and reminder checks on a fixed cadence.
//!
//! The sweep itself is idempotent and guarded by the store's
//! compare-and-swap, so running it alongside inbound triggers is safe; a
//! stale sweep write simply loses.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use tracing::info;

use crate::workflow::WorkflowEngine;

pub struct SweeperControl {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl SweeperControl {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn stop_and_join(&mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

pub fn start_sweeper(engine: Arc<WorkflowEngine>, interval: Duration) -> SweeperControl {
    let stop = Arc::new(AtomicBool::new(false));
    let sweeper_stop = stop.clone();
    let handle = thread::spawn(move || {
        info!(interval_secs = interval.as_secs(), "sweeper started");
        while !sweeper_stop.load(Ordering::Relaxed) {
            engine.sweep(Utc::now());
            // Sleep in short steps so shutdown is not held up by a long
            // interval.
            let mut remaining = interval;
            while !sweeper_stop.load(Ordering::Relaxed) && !remaining.is_zero() {
                let step = remaining.min(Duration::from_millis(250));
                thread::sleep(step);
                remaining = remaining.saturating_sub(step);
            }
        }
        info!("sweeper stopped");
    });
    SweeperControl {
        stop,
        handle: Some(handle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::tests::fakes::{FakeCalendar, FakeCrm, FakeEmail, FakeLlm};
    use crate::workflow::WorkflowStore;
    use tempfile::TempDir;

    #[test]
    fn sweeper_stops_promptly() {
        let temp = TempDir::new().expect("temp dir");
        let store = WorkflowStore::new(temp.path().join("negotiations.db")).expect("store");
        let engine = Arc::new(
            WorkflowEngine::new(
                store,
                Arc::new(FakeCalendar::default()),
                Arc::new(FakeEmail::default()),
                Arc::new(FakeCrm::default()),
                Arc::new(FakeLlm::default()),
            )
            .with_retry_delays(&[]),
        );

        let mut control = start_sweeper(engine, Duration::from_secs(60));
        control.stop_and_join();
    }
}
