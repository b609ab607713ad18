//! distance_monitor - rangefinder telemetry daemon
//!
//! Samples the ultrasonic rangefinder while the trigger signal reports a
//! subject and emits one distance record per sample.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use edge_deterrent::config::DeterrentConfig;
use edge_deterrent::telemetry::{DistanceRecord, JsonLinesSink, LogSink, TelemetrySink};
use edge_deterrent::{PollerConfig, Rangefinder, RangefinderPoller, SysfsPulsePins, TriggerSignal};

#[derive(Parser, Debug)]
#[command(author, version, about = "Ultrasonic distance telemetry")]
struct Args {
    /// JSON config file.
    #[arg(long, env = "DETERRENT_CONFIG")]
    config: Option<PathBuf>,

    /// Seconds between samples.
    #[arg(long, default_value_t = 1.0)]
    interval_secs: f64,

    /// Measure even when the trigger signal reads false.
    #[arg(long)]
    always: bool,

    /// Take one sample, print it and exit.
    #[arg(long)]
    once: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let cfg = DeterrentConfig::load_from(args.config.as_deref())?;
    let rf = &cfg.rangefinder;

    let pins = SysfsPulsePins::open(&rf.gpio_root, rf.trigger_line, rf.echo_line)?;
    let mut rangefinder = Rangefinder::new(pins, rf.timing());
    let signal = TriggerSignal::new(&cfg.signal_path);

    if args.once {
        let sample = rangefinder.measure_distance()?;
        let record = DistanceRecord::new(sample, signal.read()?);
        println!("{}", serde_json::to_string(&record)?);
        return Ok(());
    }

    if !(args.interval_secs.is_finite() && args.interval_secs > 0.0) {
        anyhow::bail!("--interval-secs must be a positive number");
    }
    let sink: Box<dyn TelemetrySink> = match &cfg.telemetry_path {
        Some(path) => {
            log::info!("appending distance telemetry to {}", path.display());
            Box::new(JsonLinesSink::open(path)?)
        }
        None => Box::new(LogSink),
    };

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("install Ctrl-C handler")?;

    let mut poller = RangefinderPoller::spawn(
        rangefinder,
        PollerConfig {
            interval: Duration::from_secs_f64(args.interval_secs),
            signal: Some(signal),
            require_presence: !args.always,
        },
        sink,
    )?;

    log::info!("distance_monitor waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping rangefinder...");
    poller.stop();
    log::info!("distance_monitor stopped after {} samples", poller.samples());
    Ok(())
}
