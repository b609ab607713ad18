//! Persistent detection worker.
//!
//! One thread owns the classifier and receives frames over a single-slot
//! channel. The `in_flight` flag is raised by `submit` and lowered only after
//! the result has been published, so callers that see `is_busy() == false`
//! also see the newest batch. At most one request is ever outstanding; an
//! in-flight request is never cancelled, it completes or times out.

use anyhow::{anyhow, Context, Result};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::detect::backend::Classifier;
use crate::detect::result::DetectionBatch;
use crate::frame::Frame;
use crate::signal::TriggerSignal;
use crate::state::SharedDetectionState;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

pub struct DetectionWorker {
    sender: Option<SyncSender<Frame>>,
    in_flight: Arc<AtomicBool>,
    counters: Arc<Counters>,
    join: Option<JoinHandle<()>>,
    backend: &'static str,
}

impl DetectionWorker {
    /// Start the worker thread.
    ///
    /// Successful batches are published to `state`; when `signal` is set, the
    /// trigger file is updated from each batch's class presence.
    pub fn spawn<C: Classifier + 'static>(
        classifier: C,
        state: SharedDetectionState,
        signal: Option<TriggerSignal>,
    ) -> Result<Self> {
        let backend = classifier.name();
        let (sender, receiver) = mpsc::sync_channel::<Frame>(1);
        let in_flight = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());

        let in_flight_thread = in_flight.clone();
        let counters_thread = counters.clone();
        let join = std::thread::Builder::new()
            .name("detection-worker".to_string())
            .spawn(move || {
                run_worker(
                    classifier,
                    receiver,
                    state,
                    signal,
                    in_flight_thread,
                    counters_thread,
                )
            })
            .context("spawn detection worker")?;

        log::info!("detection worker started (backend={})", backend);
        Ok(Self {
            sender: Some(sender),
            in_flight,
            counters,
            join: Some(join),
            backend,
        })
    }

    pub fn backend(&self) -> &'static str {
        self.backend
    }

    /// True while a submitted frame has not finished processing.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Hand a frame to the worker.
    ///
    /// Returns `Ok(false)` without queueing when a request is already
    /// outstanding.
    pub fn submit(&self, frame: Frame) -> Result<bool> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(false);
        }
        let Some(sender) = self.sender.as_ref() else {
            self.in_flight.store(false, Ordering::SeqCst);
            return Err(anyhow!("detection worker stopped"));
        };
        match sender.try_send(frame) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(true)
            }
            Err(TrySendError::Full(_)) => {
                self.in_flight.store(false, Ordering::SeqCst);
                Ok(false)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.in_flight.store(false, Ordering::SeqCst);
                Err(anyhow!("detection worker exited"))
            }
        }
    }

    /// Block until no request is outstanding or `timeout` passes.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.is_busy() {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        true
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

impl Drop for DetectionWorker {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop once any in-flight request finishes.
        self.sender.take();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::warn!("detection worker panicked during shutdown");
            }
        }
        log::debug!("detection worker joined");
    }
}

fn run_worker<C: Classifier>(
    mut classifier: C,
    receiver: Receiver<Frame>,
    state: SharedDetectionState,
    signal: Option<TriggerSignal>,
    in_flight: Arc<AtomicBool>,
    counters: Arc<Counters>,
) {
    for frame in receiver.iter() {
        let outcome = run_cycle(&mut classifier, &frame, &state, signal.as_ref());
        match outcome {
            Ok(()) => {
                counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                log::warn!("detection cycle skipped: {:#}", err);
            }
        }
        in_flight.store(false, Ordering::SeqCst);
    }
}

fn run_cycle<C: Classifier>(
    classifier: &mut C,
    frame: &Frame,
    state: &SharedDetectionState,
    signal: Option<&TriggerSignal>,
) -> Result<()> {
    let started = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| classifier.classify(frame)));
    let detections = outcome.map_err(|_| anyhow!("classifier '{}' panicked", classifier.name()))??;

    let batch = DetectionBatch::for_frame(detections, frame, classifier.input_size());
    let unmarked = batch.unmarked_present();
    let marked = batch.marked_present();
    log::debug!(
        "frame #{} classified in {:?} ({:?} since capture): {} detections (unmarked={}, marked={})",
        frame.sequence,
        started.elapsed(),
        batch.latency(),
        batch.detections.len(),
        unmarked,
        marked
    );
    state.publish(batch)?;

    if let Some(signal) = signal {
        if let Err(err) = signal.record_presence(unmarked, marked) {
            log::warn!("trigger signal not updated: {:#}", err);
        }
    }
    Ok(())
}
