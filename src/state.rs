//! Detection batch handoff between the detection worker and the capture loop.
//!
//! The lock guards nothing but two `Option<DetectionBatch>` slots. Writers
//! swap a finished batch in; readers clone it out. Neither side holds the
//! guard across I/O or per-object processing.

use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex};

use crate::detect::DetectionBatch;

#[derive(Debug, Default)]
struct Slots {
    current: Option<DetectionBatch>,
    previous: Option<DetectionBatch>,
}

#[derive(Clone, Debug, Default)]
pub struct SharedDetectionState {
    slots: Arc<Mutex<Slots>>,
}

impl SharedDetectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current batch. The replaced batch becomes `previous`.
    pub fn publish(&self, batch: DetectionBatch) -> Result<()> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| anyhow!("detection state lock poisoned"))?;
        slots.previous = slots.current.replace(batch);
        Ok(())
    }

    /// Copy of the latest batch, if any has been published.
    pub fn snapshot(&self) -> Result<Option<DetectionBatch>> {
        let slots = self
            .slots
            .lock()
            .map_err(|_| anyhow!("detection state lock poisoned"))?;
        Ok(slots.current.clone())
    }

    /// Copy of the batch that preceded the current one.
    pub fn previous(&self) -> Result<Option<DetectionBatch>> {
        let slots = self
            .slots
            .lock()
            .map_err(|_| anyhow!("detection state lock poisoned"))?;
        Ok(slots.previous.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{Detection, DetectionClass};

    fn batch_with(n: usize) -> DetectionBatch {
        let det = Detection {
            class: DetectionClass::Marked,
            center_x: 0.0,
            center_y: 0.0,
            width: 1.0,
            height: 1.0,
            confidence: 0.5,
        };
        DetectionBatch::new(vec![det; n], (640, 480), (416, 416))
    }

    #[test]
    fn empty_until_first_publish() -> Result<()> {
        let state = SharedDetectionState::new();
        assert!(state.snapshot()?.is_none());
        assert!(state.previous()?.is_none());
        Ok(())
    }

    #[test]
    fn publish_keeps_current_and_prior_batch() -> Result<()> {
        let state = SharedDetectionState::new();
        state.publish(batch_with(1))?;
        state.publish(batch_with(2))?;
        state.publish(batch_with(3))?;

        assert_eq!(state.snapshot()?.unwrap().detections.len(), 3);
        assert_eq!(state.previous()?.unwrap().detections.len(), 2);
        Ok(())
    }

    #[test]
    fn snapshot_is_detached_from_later_publishes() -> Result<()> {
        let state = SharedDetectionState::new();
        state.publish(batch_with(1))?;
        let snapshot = state.snapshot()?.unwrap();

        let writer = state.clone();
        std::thread::spawn(move || writer.publish(batch_with(5)))
            .join()
            .unwrap()?;

        assert_eq!(snapshot.detections.len(), 1);
        assert_eq!(state.snapshot()?.unwrap().detections.len(), 5);
        Ok(())
    }
}
