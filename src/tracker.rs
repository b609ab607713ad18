//! Positional re-identification across frames.
//!
//! This is not multi-object tracking. An object is "the same" as a known one
//! when a detection of the same class lands within `move_tolerance_px` of a
//! stored position. Identity only carries a cosmetic frequency value shown
//! next to the box; nothing downstream depends on it.
//!
//! Entries not matched for `stale_after_frames` consecutive updates are
//! pruned, which bounds the table to what has recently been on screen.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

use crate::detect::{DetectionBatch, DetectionClass};

pub const DEFAULT_MOVE_TOLERANCE_PX: f32 = 5.0;
pub const DEFAULT_FREQUENCY_MIN_KHZ: u32 = 40;
pub const DEFAULT_FREQUENCY_MAX_KHZ: u32 = 60;
pub const DEFAULT_BOX_INFLATION: f32 = 1.2;
pub const DEFAULT_STALE_AFTER_FRAMES: u64 = 90;

#[derive(Clone, Debug, PartialEq)]
pub struct TrackerConfig {
    pub move_tolerance_px: f32,
    pub frequency_min_khz: u32,
    pub frequency_max_khz: u32,
    /// Scale applied to box width and height after mapping to frame space.
    pub box_inflation: f32,
    pub stale_after_frames: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            move_tolerance_px: DEFAULT_MOVE_TOLERANCE_PX,
            frequency_min_khz: DEFAULT_FREQUENCY_MIN_KHZ,
            frequency_max_khz: DEFAULT_FREQUENCY_MAX_KHZ,
            box_inflation: DEFAULT_BOX_INFLATION,
            stale_after_frames: DEFAULT_STALE_AFTER_FRAMES,
        }
    }
}

/// Class plus truncated center, in frame pixels.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TrackKey {
    pub class: DetectionClass,
    pub x: i32,
    pub y: i32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TrackedObject {
    pub last_position: (f32, f32),
    pub assigned_frequency: u32,
    pub last_seen_frame: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn width(&self) -> i32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> i32 {
        self.y2.saturating_sub(self.y1)
    }

    pub fn center(&self) -> (i32, i32) {
        (midpoint(self.x1, self.x2), midpoint(self.y1, self.y2))
    }
}

fn midpoint(a: i32, b: i32) -> i32 {
    ((i64::from(a) + i64::from(b)) / 2) as i32
}

/// One rendered detection with its tracking attributes.
#[derive(Clone, Debug)]
pub struct TrackedBox {
    pub key: TrackKey,
    pub bbox: BoundingBox,
    pub center: (f32, f32),
    pub confidence: f32,
    pub frequency_khz: u32,
    /// A fresh identity was created for this box on this update.
    pub is_new: bool,
}

#[derive(Clone, Debug)]
pub struct TrackerFrame {
    pub render_class: DetectionClass,
    pub boxes: Vec<TrackedBox>,
}

/// Unmarked boxes win the frame whenever any are present.
pub fn select_render_class(batch: Option<&DetectionBatch>) -> DetectionClass {
    if batch.is_some_and(|b| b.unmarked_present()) {
        DetectionClass::Unmarked
    } else {
        DetectionClass::Marked
    }
}

pub struct ObjectTracker<R = StdRng> {
    config: TrackerConfig,
    objects: HashMap<TrackKey, TrackedObject>,
    frame_index: u64,
    rng: R,
}

impl ObjectTracker<StdRng> {
    pub fn new(config: TrackerConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }
}

impl<R: Rng> ObjectTracker<R> {
    pub fn with_rng(config: TrackerConfig, rng: R) -> Self {
        Self {
            config,
            objects: HashMap::new(),
            frame_index: 0,
            rng,
        }
    }

    /// Process one display frame against the latest batch.
    ///
    /// `frame_width`/`frame_height` are the dimensions of the frame being
    /// displayed now, which may differ from the frame the batch came from.
    pub fn update(
        &mut self,
        batch: Option<&DetectionBatch>,
        frame_width: u32,
        frame_height: u32,
    ) -> TrackerFrame {
        self.frame_index += 1;
        let render_class = select_render_class(batch);
        let mut boxes = Vec::new();

        if let Some(batch) = batch {
            let scale_x = frame_width as f32 / batch.input_width.max(1) as f32;
            let scale_y = frame_height as f32 / batch.input_height.max(1) as f32;
            let inflation = self.config.box_inflation;
            let max_x = frame_width as f32;
            let max_y = frame_height as f32;

            for det in batch
                .detections
                .iter()
                .filter(|det| det.class == render_class)
            {
                let w = det.width * scale_x * inflation;
                let h = det.height * scale_y * inflation;
                let raw_cx = det.center_x * scale_x;
                let raw_cy = det.center_y * scale_y;
                if ![raw_cx, raw_cy, w, h].iter().all(|v| v.is_finite()) {
                    log::debug!("dropping detection with non-finite geometry: {:?}", det);
                    continue;
                }
                // Detector coordinates are untrusted; keep everything on the frame.
                let cx = raw_cx.clamp(0.0, max_x);
                let cy = raw_cy.clamp(0.0, max_y);
                let bbox = BoundingBox {
                    x1: (raw_cx - w / 2.0).clamp(0.0, max_x) as i32,
                    y1: (raw_cy - h / 2.0).clamp(0.0, max_y) as i32,
                    x2: (raw_cx + w / 2.0).clamp(0.0, max_x) as i32,
                    y2: (raw_cy + h / 2.0).clamp(0.0, max_y) as i32,
                };

                let (key, frequency_khz, is_new) = self.observe(&det.class, (cx, cy));
                boxes.push(TrackedBox {
                    key,
                    bbox,
                    center: (cx, cy),
                    confidence: det.confidence,
                    frequency_khz,
                    is_new,
                });
            }
        }

        self.prune();
        TrackerFrame {
            render_class,
            boxes,
        }
    }

    pub fn get(&self, key: &TrackKey) -> Option<&TrackedObject> {
        self.objects.get(key)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn observe(&mut self, class: &DetectionClass, position: (f32, f32)) -> (TrackKey, u32, bool) {
        let nearest = self
            .objects
            .iter()
            .filter(|(key, _)| &key.class == class)
            .map(|(key, obj)| (key.clone(), distance(obj.last_position, position)))
            .min_by(|a, b| a.1.total_cmp(&b.1));

        if let Some((key, dist)) = nearest {
            if dist <= self.config.move_tolerance_px {
                if let Some(obj) = self.objects.get_mut(&key) {
                    obj.last_seen_frame = self.frame_index;
                    return (key, obj.assigned_frequency, false);
                }
            }
        }

        let key = TrackKey {
            class: class.clone(),
            x: position.0 as i32,
            y: position.1 as i32,
        };
        let frequency = self
            .rng
            .gen_range(self.config.frequency_min_khz..=self.config.frequency_max_khz);
        self.objects.insert(
            key.clone(),
            TrackedObject {
                last_position: position,
                assigned_frequency: frequency,
                last_seen_frame: self.frame_index,
            },
        );
        (key, frequency, true)
    }

    fn prune(&mut self) {
        let now = self.frame_index;
        let stale_after = self.config.stale_after_frames;
        let before = self.objects.len();
        self.objects
            .retain(|_, obj| now.saturating_sub(obj.last_seen_frame) <= stale_after);
        let pruned = before - self.objects.len();
        if pruned > 0 {
            log::debug!("tracker pruned {} stale objects", pruned);
        }
    }
}

fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    let dx = a.0 - b.0;
    let dy = a.1 - b.1;
    (dx * dx + dy * dy).sqrt()
}
