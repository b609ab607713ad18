//! deterrentd - edge deterrent daemon
//!
//! This daemon:
//! 1. Captures frames from the configured camera source
//! 2. Dispatches frames to the detector at a fixed cadence, one at a time
//! 3. Tracks detections and drives the escalation timer every frame
//! 4. Starts the acoustic deterrent after a sustained trigger, stops it on reset
//! 5. Optionally samples the rangefinder on its own thread

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use edge_deterrent::config::DeterrentConfig;
use edge_deterrent::render::{OverlayRenderer, PreviewWriter};
use edge_deterrent::telemetry::{JsonLinesSink, LogSink, TelemetrySink};
use edge_deterrent::{
    CameraSource, Classifier, Deterrent, DeterrentController, DeterrentLoop, DetectionWorker,
    LoopSettings, PollerConfig, Rangefinder, RangefinderPoller, RemoteClassifier,
    SharedDetectionState, StubClassifier, SysfsPulsePins, TriggerSignal,
};

/// Upper bound on how long the startup sound may hold up the loop.
const STARTUP_SOUND_LIMIT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about = "Edge perception loop with escalating acoustic deterrent")]
struct Args {
    /// JSON config file.
    #[arg(long, env = "DETERRENT_CONFIG")]
    config: Option<PathBuf>,

    /// Override the camera source (stub://<name>, /dev/videoN or an image path).
    #[arg(long)]
    camera: Option<String>,

    /// Write an annotated JPEG preview to this path.
    #[arg(long)]
    preview: Option<PathBuf>,

    /// Sample the rangefinder alongside the capture loop.
    #[arg(long)]
    rangefinder: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = DeterrentConfig::load_from(args.config.as_deref())?;
    if let Some(camera) = args.camera {
        cfg.camera.source = camera;
    }
    if let Some(preview) = args.preview {
        cfg.preview.path = Some(preview);
    }
    if args.rangefinder {
        cfg.rangefinder.enabled = true;
    }

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = running.clone();
    ctrlc::set_handler(move || {
        handler_flag.store(false, Ordering::SeqCst);
    })
    .context("install Ctrl-C handler")?;

    let signal = TriggerSignal::new(&cfg.signal_path);
    let state = SharedDetectionState::new();
    let worker = spawn_worker(&cfg, state.clone(), signal.clone())?;

    let mut deterrent = DeterrentController::new(cfg.deterrent.clone());
    if let Some(sound_id) = &cfg.escalation.startup_sound_id {
        play_startup_sound(&mut deterrent, sound_id);
    }

    let _poller = if cfg.rangefinder.enabled {
        Some(spawn_rangefinder(&cfg, signal.clone())?)
    } else {
        None
    };

    let mut source = CameraSource::new(cfg.camera.clone())?;
    source.connect()?;

    let renderer = match &cfg.preview.font_path {
        Some(path) => OverlayRenderer::with_font_file(path)?,
        None => OverlayRenderer::new(),
    };
    let preview = cfg
        .preview
        .path
        .as_ref()
        .map(|path| PreviewWriter::new(path, cfg.preview.interval));
    if let Some(preview) = &preview {
        log::info!("writing preview to {}", preview.path().display());
    }

    let settings = LoopSettings {
        dispatch_interval: cfg.detector.dispatch_interval,
        tracker: cfg.tracker.clone(),
        escalation: cfg.escalation.machine_config(),
        labels: cfg.detector.labels.clone(),
        renderer,
        preview,
    };

    log::info!(
        "deterrentd starting: camera={} detector={} threshold={:?} sound={} signal={}",
        cfg.camera.source,
        if cfg.detector.is_stub() {
            cfg.detector.url.as_str()
        } else {
            "remote"
        },
        cfg.escalation.threshold,
        cfg.escalation.sound_id,
        signal.path().display()
    );

    let mut control = DeterrentLoop::new(source, worker, state, deterrent, settings);
    let stats = control.run(&running)?;
    log::info!(
        "deterrentd stopped: frames={} dispatched={} activations={}",
        stats.frames,
        stats.dispatched,
        control.escalation().activations()
    );
    Ok(())
}

fn spawn_worker(
    cfg: &DeterrentConfig,
    state: SharedDetectionState,
    signal: TriggerSignal,
) -> Result<DetectionWorker> {
    let classifier: Box<dyn Classifier> = if cfg.detector.is_stub() {
        Box::new(
            StubClassifier::for_scene(&cfg.detector.url)
                .with_input_size(cfg.detector.input_width, cfg.detector.input_height),
        )
    } else {
        let remote = RemoteClassifier::new(cfg.detector.classifier_config())?;
        log::info!("remote detector at {}", remote.endpoint());
        Box::new(remote)
    };
    DetectionWorker::spawn(classifier, state, Some(signal))
}

fn spawn_rangefinder(cfg: &DeterrentConfig, signal: TriggerSignal) -> Result<RangefinderPoller> {
    let rf = &cfg.rangefinder;
    let pins = SysfsPulsePins::open(&rf.gpio_root, rf.trigger_line, rf.echo_line)?;
    let sink: Box<dyn TelemetrySink> = match &cfg.telemetry_path {
        Some(path) => Box::new(JsonLinesSink::open(path)?),
        None => Box::new(LogSink),
    };
    RangefinderPoller::spawn(
        Rangefinder::new(pins, rf.timing()),
        PollerConfig {
            interval: rf.poll_interval,
            signal: Some(signal),
            require_presence: false,
        },
        sink,
    )
}

fn play_startup_sound(deterrent: &mut DeterrentController, sound_id: &str) {
    if let Err(err) = deterrent.start(sound_id) {
        log::warn!("startup sound '{}' failed: {:#}", sound_id, err);
        return;
    }
    let deadline = Instant::now() + STARTUP_SOUND_LIMIT;
    while deterrent.is_playing() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(50));
    }
    if let Err(err) = deterrent.stop() {
        log::warn!("startup sound '{}' did not stop: {:#}", sound_id, err);
    }
}
