//! Capture, dispatch, track, escalate.
//!
//! One iteration per frame on the calling thread. Detection runs on the
//! worker thread and is dispatched at most once per `dispatch_interval`,
//! never while a request is outstanding. Tracking and escalation always run
//! against the latest published batch, which may be older than the frame on
//! screen.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::detect::{ClassLabels, DetectionBatch, DetectionWorker};
use crate::deterrent::Deterrent;
use crate::error::PerceptionError;
use crate::escalation::{EscalationConfig, EscalationState, EscalationStateMachine};
use crate::ingest::FrameSource;
use crate::render::{build_overlay, Overlay, OverlayRenderer, PreviewWriter};
use crate::state::SharedDetectionState;
use crate::tracker::{ObjectTracker, TrackerConfig};

pub const DEFAULT_DISPATCH_INTERVAL: Duration = Duration::from_millis(1500);
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Rate limit for detector dispatch.
#[derive(Clone, Copy, Debug)]
pub struct DispatchCadence {
    interval: Duration,
    last_dispatch: Option<Instant>,
}

impl DispatchCadence {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_dispatch: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_dispatch(&self) -> Option<Instant> {
        self.last_dispatch
    }

    pub fn should_dispatch(&self, now: Instant, busy: bool) -> bool {
        if busy {
            return false;
        }
        match self.last_dispatch {
            Some(last) => now.saturating_duration_since(last) >= self.interval,
            None => true,
        }
    }

    pub fn record(&mut self, now: Instant) {
        self.last_dispatch = Some(now);
    }
}

pub struct LoopSettings {
    pub dispatch_interval: Duration,
    pub tracker: TrackerConfig,
    pub escalation: EscalationConfig,
    pub labels: ClassLabels,
    pub renderer: OverlayRenderer,
    pub preview: Option<PreviewWriter>,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            dispatch_interval: DEFAULT_DISPATCH_INTERVAL,
            tracker: TrackerConfig::default(),
            escalation: EscalationConfig::default(),
            labels: ClassLabels::default(),
            renderer: OverlayRenderer::new(),
            preview: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub frames: u64,
    pub dispatched: u64,
}

/// Change in the trigger condition between two consecutive batches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerEdge {
    Raised,
    Cleared,
}

#[derive(Clone, Debug)]
pub struct StepOutcome {
    pub sequence: u64,
    pub dispatched: bool,
    pub trigger: bool,
    /// Set on the first frame that sees a batch flipping the trigger.
    pub edge: Option<TriggerEdge>,
    pub state: EscalationState,
    pub overlay: Overlay,
}

/// Point-in-time view reported by the periodic health log.
#[derive(Clone, Debug, PartialEq)]
pub struct LoopHealth {
    pub source_healthy: bool,
    pub frames: u64,
    pub dispatched: u64,
    pub completed: u64,
    pub failed: u64,
    /// Time since the latest batch was published.
    pub batch_age: Option<Duration>,
    pub escalation: EscalationState,
}

pub struct DeterrentLoop<S, D> {
    source: S,
    worker: DetectionWorker,
    state: SharedDetectionState,
    deterrent: D,
    tracker: ObjectTracker,
    escalation: EscalationStateMachine,
    cadence: DispatchCadence,
    labels: ClassLabels,
    renderer: OverlayRenderer,
    preview: Option<PreviewWriter>,
    stats: LoopStats,
    last_batch_at: Option<Instant>,
}

impl<S: FrameSource, D: Deterrent> DeterrentLoop<S, D> {
    /// `state` must be the handle the worker publishes into.
    pub fn new(
        source: S,
        worker: DetectionWorker,
        state: SharedDetectionState,
        deterrent: D,
        settings: LoopSettings,
    ) -> Self {
        Self {
            source,
            worker,
            state,
            deterrent,
            tracker: ObjectTracker::new(settings.tracker),
            escalation: EscalationStateMachine::new(settings.escalation),
            cadence: DispatchCadence::new(settings.dispatch_interval),
            labels: settings.labels,
            renderer: settings.renderer,
            preview: settings.preview,
            stats: LoopStats::default(),
            last_batch_at: None,
        }
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn worker(&self) -> &DetectionWorker {
        &self.worker
    }

    pub fn escalation(&self) -> &EscalationStateMachine {
        &self.escalation
    }

    pub fn deterrent_mut(&mut self) -> &mut D {
        &mut self.deterrent
    }

    pub fn cadence(&self) -> &DispatchCadence {
        &self.cadence
    }

    pub fn health(&self, now: Instant) -> LoopHealth {
        let worker = self.worker.stats();
        let batch_age = match self.state.snapshot() {
            Ok(snapshot) => snapshot.map(|batch| batch.age(now)),
            Err(err) => {
                log::warn!("detection snapshot unavailable: {:#}", err);
                None
            }
        };
        LoopHealth {
            source_healthy: self.source.is_healthy(),
            frames: self.stats.frames,
            dispatched: self.stats.dispatched,
            completed: worker.completed,
            failed: worker.failed,
            batch_age,
            escalation: self.escalation.state(),
        }
    }

    /// One frame. Only a frame-source failure is returned as an error.
    pub fn step(&mut self, now: Instant) -> Result<StepOutcome> {
        let mut frame = self.source.next_frame().map_err(|err| {
            anyhow::Error::new(PerceptionError::FrameSourceFailure {
                reason: format!("{}: {:#}", self.source.describe(), err),
            })
        })?;
        self.stats.frames += 1;

        let mut dispatched = false;
        if self.cadence.should_dispatch(now, self.worker.is_busy()) {
            match self.worker.submit(frame.clone()) {
                Ok(true) => {
                    self.cadence.record(now);
                    self.stats.dispatched += 1;
                    dispatched = true;
                }
                Ok(false) => {}
                Err(err) => log::warn!("detection dispatch failed: {:#}", err),
            }
        }

        let snapshot = match self.state.snapshot() {
            Ok(snapshot) => snapshot,
            Err(err) => {
                log::warn!("detection snapshot unavailable: {:#}", err);
                None
            }
        };
        let tracked = self
            .tracker
            .update(snapshot.as_ref(), frame.width(), frame.height());
        let trigger = snapshot.as_ref().is_some_and(|b| b.trigger_condition());
        let edge = match snapshot.as_ref() {
            Some(batch) if Some(batch.received_at) != self.last_batch_at => {
                self.last_batch_at = Some(batch.received_at);
                self.trigger_edge(batch)
            }
            _ => None,
        };
        let state = self.escalation.evaluate(trigger, now, &mut self.deterrent);
        let overlay = build_overlay(
            &tracked,
            &self.labels,
            state,
            self.escalation.remaining_secs(now),
        );

        if let Some(preview) = self.preview.as_mut() {
            self.renderer.draw(frame.image_mut(), &overlay);
            if let Err(err) = preview.maybe_write(frame.image(), now) {
                log::warn!("preview not written: {:#}", err);
            }
        }

        Ok(StepOutcome {
            sequence: frame.sequence,
            dispatched,
            trigger,
            edge,
            state,
            overlay,
        })
    }

    /// Compare a newly seen batch with the one it replaced.
    fn trigger_edge(&self, current: &DetectionBatch) -> Option<TriggerEdge> {
        let previous = match self.state.previous() {
            Ok(previous) => previous,
            Err(err) => {
                log::warn!("previous detection batch unavailable: {:#}", err);
                return None;
            }
        };
        let was_triggered = match previous {
            // A newer batch landed after the snapshot; the next frame sees it.
            Some(prev) if prev.received_at == current.received_at => return None,
            Some(prev) => prev.trigger_condition(),
            None => false,
        };
        let edge = match (was_triggered, current.trigger_condition()) {
            (false, true) => TriggerEdge::Raised,
            (true, false) => TriggerEdge::Cleared,
            _ => return None,
        };
        log::info!(
            "trigger {} by frame #{} ({} detections, {:?} after capture)",
            if edge == TriggerEdge::Raised { "raised" } else { "cleared" },
            current.frame_sequence,
            current.detections.len(),
            current.latency()
        );
        Some(edge)
    }

    /// Run until `running` is cleared or the frame source fails. The
    /// deterrent is stopped on every exit path.
    pub fn run(&mut self, running: &AtomicBool) -> Result<LoopStats> {
        log::info!(
            "capture loop running (source={}, backend={}, dispatch every {:?})",
            self.source.describe(),
            self.worker.backend(),
            self.cadence.interval()
        );
        let mut last_health_log = Instant::now();

        let result = loop {
            if !running.load(Ordering::SeqCst) {
                break Ok(());
            }
            let now = Instant::now();
            if let Err(err) = self.step(now) {
                break Err(err);
            }

            if now.saturating_duration_since(last_health_log) >= HEALTH_LOG_INTERVAL {
                let health = self.health(now);
                let batch_age = health
                    .batch_age
                    .map(|age| format!("{:.1}s", age.as_secs_f64()))
                    .unwrap_or_else(|| "none".to_string());
                let level = if health.source_healthy {
                    log::Level::Info
                } else {
                    log::Level::Warn
                };
                log::log!(
                    level,
                    "source={} health={} frames={} dispatched={} completed={} failed={} batch_age={} escalation={}",
                    self.source.describe(),
                    health.source_healthy,
                    health.frames,
                    health.dispatched,
                    health.completed,
                    health.failed,
                    batch_age,
                    health.escalation.as_str()
                );
                last_health_log = now;
            }
        };

        self.shutdown();
        match result {
            Ok(()) => {
                log::info!("capture loop stopped after {} frames", self.stats.frames);
                Ok(self.stats)
            }
            Err(err) => {
                log::error!("capture loop aborted: {:#}", err);
                Err(err)
            }
        }
    }

    fn shutdown(&mut self) {
        if let Err(err) = self.deterrent.stop() {
            log::warn!("deterrent stop during shutdown failed: {:#}", err);
        }
    }
}
