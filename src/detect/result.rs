use std::time::{Duration, Instant};

use crate::frame::Frame;

/// Wire labels for the two classes the escalation logic cares about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassLabels {
    /// Subject without the marker (e.g. a dog without a collar). Drives escalation.
    pub unmarked: String,
    /// Subject wearing the marker. Suppresses escalation.
    pub marked: String,
}

impl Default for ClassLabels {
    fn default() -> Self {
        Self {
            unmarked: "dog_without_collar".to_string(),
            marked: "dog_with_collar".to_string(),
        }
    }
}

impl ClassLabels {
    pub fn classify(&self, label: &str) -> DetectionClass {
        if label == self.unmarked {
            DetectionClass::Unmarked
        } else if label == self.marked {
            DetectionClass::Marked
        } else {
            DetectionClass::Other(label.to_string())
        }
    }

    pub fn label_for<'a>(&'a self, class: &'a DetectionClass) -> &'a str {
        match class {
            DetectionClass::Unmarked => &self.unmarked,
            DetectionClass::Marked => &self.marked,
            DetectionClass::Other(label) => label,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DetectionClass {
    Unmarked,
    Marked,
    Other(String),
}

/// One classified object, in detector input coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub class: DetectionClass,
    pub center_x: f32,
    pub center_y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// Result of one classifier call.
#[derive(Clone, Debug)]
pub struct DetectionBatch {
    pub detections: Vec<Detection>,
    /// Size of the frame that was submitted.
    pub frame_width: u32,
    pub frame_height: u32,
    /// Size of the image the detector actually saw.
    pub input_width: u32,
    pub input_height: u32,
    /// Sequence number of the submitted frame.
    pub frame_sequence: u64,
    pub captured_at: Instant,
    pub received_at: Instant,
}

impl DetectionBatch {
    pub fn new(
        detections: Vec<Detection>,
        frame_size: (u32, u32),
        input_size: (u32, u32),
    ) -> Self {
        let received_at = Instant::now();
        Self {
            detections,
            frame_width: frame_size.0,
            frame_height: frame_size.1,
            input_width: input_size.0,
            input_height: input_size.1,
            frame_sequence: 0,
            captured_at: received_at,
            received_at,
        }
    }

    /// Result for `frame`, stamped with its size, sequence and capture time.
    pub fn for_frame(detections: Vec<Detection>, frame: &Frame, input_size: (u32, u32)) -> Self {
        Self {
            frame_sequence: frame.sequence,
            captured_at: frame.captured_at,
            ..Self::new(detections, (frame.width(), frame.height()), input_size)
        }
    }

    /// Capture to answer, including the detector round trip.
    pub fn latency(&self) -> Duration {
        self.received_at.saturating_duration_since(self.captured_at)
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.received_at)
    }

    pub fn contains(&self, class: &DetectionClass) -> bool {
        self.detections.iter().any(|det| &det.class == class)
    }

    pub fn unmarked_present(&self) -> bool {
        self.contains(&DetectionClass::Unmarked)
    }

    pub fn marked_present(&self) -> bool {
        self.contains(&DetectionClass::Marked)
    }

    /// Unmarked subject present and no marked subject in the same batch.
    pub fn trigger_condition(&self) -> bool {
        self.unmarked_present() && !self.marked_present()
    }
}
