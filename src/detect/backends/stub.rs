use anyhow::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::detect::backend::Classifier;
use crate::detect::result::{Detection, DetectionClass};
use crate::frame::Frame;

/// Counts classifier calls and the peak number running at once.
#[derive(Debug, Default)]
pub struct ConcurrencyProbe {
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl ConcurrencyProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Offline classifier replaying a fixed script of responses.
///
/// Each call returns the next scripted detection list, cycling; an empty
/// script always answers "nothing detected".
pub struct StubClassifier {
    script: Vec<Vec<Detection>>,
    cursor: usize,
    latency: Duration,
    input_size: (u32, u32),
    probe: Option<Arc<ConcurrencyProbe>>,
}

impl StubClassifier {
    pub fn new(script: Vec<Vec<Detection>>) -> Self {
        Self {
            script,
            cursor: 0,
            latency: Duration::ZERO,
            input_size: (416, 416),
            probe: None,
        }
    }

    /// Classifier for `stub://<scene>` detector urls.
    ///
    /// `stub://unmarked` and `stub://marked` report one centered subject of
    /// that class on every call; any other scene reports nothing.
    pub fn for_scene(url: &str) -> Self {
        let scene = url.strip_prefix("stub://").unwrap_or(url);
        let class = match scene {
            "unmarked" => Some(DetectionClass::Unmarked),
            "marked" => Some(DetectionClass::Marked),
            _ => None,
        };
        let script = class
            .map(|class| {
                vec![vec![Detection {
                    class,
                    center_x: 208.0,
                    center_y: 208.0,
                    width: 120.0,
                    height: 90.0,
                    confidence: 0.9,
                }]]
            })
            .unwrap_or_default();
        Self::new(script)
    }

    /// Simulated round-trip time per call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_input_size(mut self, width: u32, height: u32) -> Self {
        self.input_size = (width, height);
        self
    }

    pub fn with_probe(mut self, probe: Arc<ConcurrencyProbe>) -> Self {
        self.probe = Some(probe);
        self
    }
}

impl Default for StubClassifier {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl Classifier for StubClassifier {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn input_size(&self) -> (u32, u32) {
        self.input_size
    }

    fn classify(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        if let Some(probe) = &self.probe {
            probe.enter();
        }
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        let detections = if self.script.is_empty() {
            Vec::new()
        } else {
            let next = self.script[self.cursor % self.script.len()].clone();
            self.cursor += 1;
            next
        };
        if let Some(probe) = &self.probe {
            probe.exit();
        }
        Ok(detections)
    }
}
