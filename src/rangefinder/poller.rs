use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::{DistanceSample, PulsePins, Rangefinder};
use crate::signal::TriggerSignal;
use crate::telemetry::{DistanceRecord, TelemetrySink};

#[derive(Clone, Debug)]
pub struct PollerConfig {
    pub interval: Duration,
    /// Read for the record's `player` field.
    pub signal: Option<TriggerSignal>,
    /// Skip measuring while the signal reads false. A presence-only record
    /// is still emitted every poll.
    pub require_presence: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            signal: None,
            require_presence: false,
        }
    }
}

/// Samples the rangefinder on a dedicated thread.
pub struct RangefinderPoller {
    stop: Arc<AtomicBool>,
    latest: Arc<Mutex<Option<DistanceSample>>>,
    samples: Arc<AtomicU64>,
    join: Option<JoinHandle<()>>,
}

impl RangefinderPoller {
    pub fn spawn<P, T>(rangefinder: Rangefinder<P>, config: PollerConfig, sink: T) -> Result<Self>
    where
        P: PulsePins + 'static,
        T: TelemetrySink + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let latest = Arc::new(Mutex::new(None));
        let samples = Arc::new(AtomicU64::new(0));

        let worker = PollWorker {
            rangefinder,
            config,
            sink,
            stop: stop.clone(),
            latest: latest.clone(),
            samples: samples.clone(),
        };
        let join = std::thread::Builder::new()
            .name("rangefinder".to_string())
            .spawn(move || worker.run())
            .context("spawn rangefinder poller")?;

        Ok(Self {
            stop,
            latest,
            samples,
            join: Some(join),
        })
    }

    pub fn latest(&self) -> Result<Option<DistanceSample>> {
        let latest = self
            .latest
            .lock()
            .map_err(|_| anyhow!("rangefinder sample lock poisoned"))?;
        Ok(*latest)
    }

    /// Successful measurements so far.
    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::warn!("rangefinder poller panicked");
            }
        }
    }
}

impl Drop for RangefinderPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

struct PollWorker<P, T> {
    rangefinder: Rangefinder<P>,
    config: PollerConfig,
    sink: T,
    stop: Arc<AtomicBool>,
    latest: Arc<Mutex<Option<DistanceSample>>>,
    samples: Arc<AtomicU64>,
}

impl<P: PulsePins, T: TelemetrySink> PollWorker<P, T> {
    fn run(mut self) {
        log::info!("rangefinder poller started (interval={:?})", self.config.interval);
        while !self.stop.load(Ordering::SeqCst) {
            let next = Instant::now() + self.config.interval;
            self.poll_once();
            while !self.stop.load(Ordering::SeqCst) && Instant::now() < next {
                std::thread::sleep(Duration::from_millis(10).min(self.config.interval));
            }
        }
        log::info!("rangefinder poller stopped");
    }

    fn poll_once(&mut self) {
        let player = match self.config.signal.as_ref().map(TriggerSignal::read) {
            Some(Ok(value)) => value,
            Some(Err(err)) => {
                log::warn!("trigger signal unreadable: {:#}", err);
                false
            }
            None => false,
        };
        let record = if self.config.require_presence && !player {
            DistanceRecord::presence(player)
        } else {
            match self.rangefinder.measure_distance() {
                Ok(sample) => {
                    self.samples.fetch_add(1, Ordering::Relaxed);
                    match self.latest.lock() {
                        Ok(mut latest) => *latest = Some(sample),
                        Err(_) => log::warn!("rangefinder sample lock poisoned"),
                    }
                    DistanceRecord::new(sample, player)
                }
                Err(err) => {
                    log::warn!("distance sample dropped: {:#}", err);
                    DistanceRecord::presence(player)
                }
            }
        };
        if let Err(err) = self.sink.emit(&record) {
            log::warn!("telemetry emit failed: {:#}", err);
        }
    }
}
