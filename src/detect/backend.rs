use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Classifier backend trait.
///
/// A classifier turns one frame into a list of detections expressed in its
/// own input coordinate space (see `input_size`). Calls may block for the
/// full network round trip; they only ever run on the detection worker.
///
/// Failures should wrap `PerceptionError::DetectorUnavailable` so the worker
/// can log them as a skipped cycle.
pub trait Classifier: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Width and height of the image the classifier reasons about.
    fn input_size(&self) -> (u32, u32);

    /// Classify a frame. An empty list is a normal result.
    fn classify(&mut self, frame: &Frame) -> Result<Vec<Detection>>;
}

impl<C: Classifier + ?Sized> Classifier for Box<C> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn input_size(&self) -> (u32, u32) {
        (**self).input_size()
    }

    fn classify(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        (**self).classify(frame)
    }
}
