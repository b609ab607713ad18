use anyhow::{anyhow, Result};
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use edge_deterrent::detect::ConcurrencyProbe;
use edge_deterrent::error::classify;
use edge_deterrent::{
    Deterrent, DeterrentLoop, Detection, DetectionClass, DetectionWorker, EscalationState,
    Frame, FrameSource, LoopSettings, SharedDetectionState, StubClassifier, TriggerEdge,
};

struct ScriptedSource {
    sequence: u64,
    fail_after: Option<u64>,
    healthy: bool,
}

impl ScriptedSource {
    fn endless() -> Self {
        Self {
            sequence: 0,
            fail_after: None,
            healthy: true,
        }
    }

    fn failing_after(frames: u64) -> Self {
        Self {
            fail_after: Some(frames),
            ..Self::endless()
        }
    }
}

impl FrameSource for ScriptedSource {
    fn next_frame(&mut self) -> Result<Frame> {
        if self.fail_after.is_some_and(|limit| self.sequence >= limit) {
            return Err(anyhow!("end of stream"));
        }
        self.sequence += 1;
        Frame::from_rgb(vec![0u8; 64 * 48 * 3], 64, 48, self.sequence)
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }

    fn is_healthy(&self) -> bool {
        self.healthy
    }
}

#[derive(Default)]
struct RecordingDeterrent {
    starts: Vec<String>,
    stops: usize,
    playing: bool,
}

impl Deterrent for RecordingDeterrent {
    fn start(&mut self, sound_id: &str) -> Result<()> {
        self.starts.push(sound_id.to_string());
        self.playing = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.stops += 1;
        self.playing = false;
        Ok(())
    }

    fn is_playing(&mut self) -> bool {
        self.playing
    }
}

fn detection(class: DetectionClass) -> Detection {
    Detection {
        class,
        center_x: 208.0,
        center_y: 208.0,
        width: 100.0,
        height: 80.0,
        confidence: 0.9,
    }
}

fn control_loop(
    classifier: StubClassifier,
    source: ScriptedSource,
) -> Result<DeterrentLoop<ScriptedSource, RecordingDeterrent>> {
    let state = SharedDetectionState::new();
    let worker = DetectionWorker::spawn(classifier, state.clone(), None)?;
    Ok(DeterrentLoop::new(
        source,
        worker,
        state,
        RecordingDeterrent::default(),
        LoopSettings::default(),
    ))
}

/// Steps at 10 fps of simulated time, letting each dispatch land before the
/// next frame.
fn drive(
    control: &mut DeterrentLoop<ScriptedSource, RecordingDeterrent>,
    t0: Instant,
    frames: u64,
    mut each: impl FnMut(u64, &edge_deterrent::StepOutcome, &mut RecordingDeterrent),
) -> Result<()> {
    for k in 0..frames {
        let now = t0 + Duration::from_millis(k * 100);
        let outcome = control.step(now)?;
        assert!(control.worker().wait_idle(Duration::from_secs(2)));
        each(k, &outcome, control.deterrent_mut());
    }
    Ok(())
}

#[test]
fn sustained_unmarked_presence_starts_deterrent_once() -> Result<()> {
    let probe = ConcurrencyProbe::new();
    let classifier = StubClassifier::new(vec![vec![detection(DetectionClass::Unmarked)]])
        .with_probe(probe.clone());
    let mut control = control_loop(classifier, ScriptedSource::endless())?;
    let t0 = Instant::now();
    let mut dispatch_times = Vec::new();
    let mut edges = Vec::new();

    drive(&mut control, t0, 120, |k, outcome, deterrent| {
        if outcome.dispatched {
            dispatch_times.push(k * 100);
        }
        edges.extend(outcome.edge);
        if k < 100 {
            assert!(deterrent.starts.is_empty(), "started early at frame {}", k);
        }
    })?;

    assert_eq!(control.escalation().state(), EscalationState::Active);
    assert_eq!(control.deterrent_mut().starts, vec!["22khz".to_string()]);
    assert_eq!(probe.peak(), 1);
    assert_eq!(edges, vec![TriggerEdge::Raised]);
    assert!(dispatch_times.len() >= 7);
    for pair in dispatch_times.windows(2) {
        assert!(pair[1] - pair[0] >= 1500, "dispatches {:?}", pair);
    }
    Ok(())
}

#[test]
fn marked_subject_suppresses_escalation() -> Result<()> {
    let classifier = StubClassifier::new(vec![vec![
        detection(DetectionClass::Unmarked),
        detection(DetectionClass::Marked),
    ]]);
    let mut control = control_loop(classifier, ScriptedSource::endless())?;

    drive(&mut control, Instant::now(), 150, |_, outcome, _| {
        assert!(!outcome.trigger);
        assert_eq!(outcome.state, EscalationState::Idle);
        assert_eq!(outcome.overlay.countdown, None);
    })?;
    assert!(control.deterrent_mut().starts.is_empty());
    Ok(())
}

#[test]
fn intermittent_presence_never_carries_over() -> Result<()> {
    // Every other detector answer is empty, so the trigger drops every 1.5 s.
    let classifier = StubClassifier::new(vec![vec![detection(DetectionClass::Unmarked)], vec![]]);
    let mut control = control_loop(classifier, ScriptedSource::endless())?;
    let mut saw_countdown = false;
    let mut raised = 0;
    let mut cleared = 0;

    drive(&mut control, Instant::now(), 300, |_, outcome, _| {
        if let Some(countdown) = &outcome.overlay.countdown {
            saw_countdown = true;
            assert!(countdown.seconds >= 8);
        }
        match outcome.edge {
            Some(TriggerEdge::Raised) => raised += 1,
            Some(TriggerEdge::Cleared) => cleared += 1,
            None => {}
        }
    })?;

    assert!(saw_countdown);
    assert!(raised >= 5, "raised {} times", raised);
    assert!(cleared >= 5, "cleared {} times", cleared);
    assert!(raised - cleared <= 1);
    assert!(control.deterrent_mut().starts.is_empty());
    assert_eq!(control.escalation().activations(), 0);
    Ok(())
}

#[test]
fn health_reports_source_state_and_batch_age() -> Result<()> {
    let source = ScriptedSource {
        healthy: false,
        ..ScriptedSource::endless()
    };
    let classifier = StubClassifier::new(vec![vec![detection(DetectionClass::Unmarked)]]);
    let mut control = control_loop(classifier, source)?;

    let before = control.health(Instant::now());
    assert!(!before.source_healthy);
    assert_eq!(before.batch_age, None);

    let t0 = Instant::now();
    drive(&mut control, t0, 3, |_, _, _| {})?;
    let health = control.health(Instant::now() + Duration::from_secs(2));
    assert!(!health.source_healthy);
    assert_eq!((health.frames, health.dispatched, health.completed), (3, 1, 1));
    assert!(health.batch_age.is_some_and(|age| age >= Duration::from_secs(2)));
    assert_eq!(health.escalation, EscalationState::Accumulating);
    Ok(())
}

#[test]
fn frame_source_failure_ends_run_and_stops_deterrent() -> Result<()> {
    let mut control = control_loop(StubClassifier::default(), ScriptedSource::failing_after(3))?;
    let running = AtomicBool::new(true);

    let err = control.run(&running).unwrap_err();
    assert_eq!(classify(&err).map(|e| e.code()), Some("frame_source_failure"));
    assert_eq!(control.stats().frames, 3);
    assert!(control.deterrent_mut().stops >= 1);
    Ok(())
}

#[test]
fn cleared_flag_exits_without_reading_frames() -> Result<()> {
    let mut control = control_loop(StubClassifier::default(), ScriptedSource::endless())?;
    let running = AtomicBool::new(false);

    let stats = control.run(&running)?;
    assert_eq!(stats.frames, 0);
    assert_eq!(control.deterrent_mut().stops, 1);
    Ok(())
}
