use log::{debug, warning};
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};
use tokio::{
    runtime::Handle,
    sync::mpsc::{self, error::TrySendError},
};

use crate::{
    cv::{Frame, RegionSelector},
    detection::{DetectionOutcome, DetectionTask, SharedDetector, SharedRecognizer},
};

/// What `on_frame` did with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Not a detection tick.
    Skipped,
    /// Detection tick, but a task is still in flight.
    Busy,
    Dispatched,
}

/// Clears the in-flight flag when the task ends, however it ends.
struct ActiveGuard(Arc<AtomicBool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Dispatches at most one detection task at a time, every `every` frames.
pub struct DetectionScheduler {
    every: u64,
    active: Arc<AtomicBool>,
    dispatched: AtomicU64,
    busy: AtomicU64,
    detector: SharedDetector,
    recognizer: SharedRecognizer,
    selector: RegionSelector,
    results: mpsc::Sender<DetectionOutcome>,
    runtime: Handle,
}

impl DetectionScheduler {
    pub fn new(
        every: u64,
        detector: SharedDetector,
        recognizer: SharedRecognizer,
        selector: RegionSelector,
        results: mpsc::Sender<DetectionOutcome>,
        runtime: Handle,
    ) -> Self {
        Self {
            every: every.max(1),
            active: Arc::new(AtomicBool::new(false)),
            dispatched: AtomicU64::new(0),
            busy: AtomicU64::new(0),
            detector,
            recognizer,
            selector,
            results,
            runtime,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Detection ticks dropped because a task was in flight.
    pub fn skipped_busy(&self) -> u64 {
        self.busy.load(Ordering::Relaxed)
    }

    pub fn on_frame(&self, frame: &Frame, frame_index: u64) -> Dispatch {
        if frame_index % self.every != 0 {
            return Dispatch::Skipped;
        }

        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.busy.fetch_add(1, Ordering::Relaxed);
            debug!("Frame {}: detection still running, tick dropped", frame_index);
            return Dispatch::Busy;
        }

        let guard = ActiveGuard(self.active.clone());
        let task = DetectionTask::new(
            frame.clone(),
            frame_index,
            self.detector.clone(),
            self.recognizer.clone(),
            self.selector,
        );
        let results = self.results.clone();

        self.runtime.spawn(async move {
            let outcome = task.run().await;
            drop(guard);

            match results.try_send(outcome) {
                Ok(()) => {}
                Err(TrySendError::Full(outcome)) => warning!(
                    "Decision queue full, dropping result for frame {}",
                    outcome.frame_index
                ),
                Err(TrySendError::Closed(_)) => debug!("Decision loop gone, result dropped"),
            }
        });

        self.dispatched.fetch_add(1, Ordering::Relaxed);
        debug!("Frame {}: detection dispatched", frame_index);
        Dispatch::Dispatched
    }
}
