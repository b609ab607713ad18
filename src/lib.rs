//! Edge deterrent
//!
//! Perception loop for an edge device: frames are classified by a remote
//! detector, detections are re-identified positionally across frames, and a
//! sustained trigger condition escalates to an acoustic deterrent. An
//! ultrasonic rangefinder is sampled alongside and reported as telemetry.
//!
//! # Architecture
//!
//! Two contexts run concurrently:
//!
//! 1. **Capture loop** (`pipeline`): reads frames, dispatches at most one
//!    detection request at a time under a rate limit, runs the tracker and the
//!    escalation state machine against the latest batch, renders the overlay.
//! 2. **Detection worker** (`detect::DetectionWorker`): owns the classifier,
//!    publishes batches into `state::SharedDetectionState` and updates the
//!    trigger signal file.
//!
//! The rangefinder optionally runs on a third thread
//! (`rangefinder::RangefinderPoller`).
//!
//! # Module Structure
//!
//! - `frame`, `ingest`: frames and frame sources (synthetic, still image, V4L2)
//! - `detect`: classifier seam, remote HTTP classifier, worker
//! - `state`, `signal`: batch handoff and the on-disk trigger signal
//! - `tracker`, `escalation`, `deterrent`: per-frame decisions and playback
//! - `rangefinder`, `telemetry`: distance sampling and its sinks
//! - `render`, `pipeline`, `config`: overlay, control loop, daemon config

pub mod config;
pub mod detect;
pub mod deterrent;
pub mod error;
pub mod escalation;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod rangefinder;
pub mod render;
pub mod signal;
pub mod state;
pub mod telemetry;
pub mod tracker;

pub use config::DeterrentConfig;
pub use detect::{
    Classifier, ClassLabels, Detection, DetectionBatch, DetectionClass, DetectionWorker,
    RemoteClassifier, RemoteClassifierConfig, StubClassifier,
};
pub use deterrent::{Deterrent, DeterrentController, DeterrentSettings};
pub use error::{EchoEdge, PerceptionError};
pub use escalation::{EscalationConfig, EscalationState, EscalationStateMachine};
pub use frame::Frame;
pub use ingest::{CameraConfig, CameraSource, FrameSource};
pub use pipeline::{
    DeterrentLoop, DispatchCadence, LoopHealth, LoopSettings, LoopStats, StepOutcome, TriggerEdge,
};
pub use rangefinder::{
    DistanceSample, PollerConfig, PulsePins, Rangefinder, RangefinderPoller, RangefinderTiming,
    SysfsPulsePins,
};
pub use signal::TriggerSignal;
pub use state::SharedDetectionState;
pub use telemetry::{DistanceRecord, JsonLinesSink, LogSink, TelemetrySink};
pub use tracker::{ObjectTracker, TrackerConfig, TrackerFrame};
