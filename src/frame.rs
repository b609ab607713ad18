//! Captured video frames.
//!
//! A `Frame` owns its RGB pixels. Cloning copies the buffer, which is how the
//! capture loop hands an independent copy to the detection worker while it
//! keeps annotating its own.

use anyhow::{anyhow, Result};
use image::RgbImage;
use std::time::Instant;

#[derive(Clone, Debug)]
pub struct Frame {
    image: RgbImage,
    /// Monotonic sequence number assigned by the source.
    pub sequence: u64,
    /// Monotonic capture instant.
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image,
            sequence,
            captured_at: Instant::now(),
        }
    }

    /// Build a frame from packed RGB24 pixels.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("RGB buffer does not fit {}x{}", width, height))?;
        Ok(Self::new(image, sequence))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rgb_checks_buffer_length() {
        assert!(Frame::from_rgb(vec![0u8; 10], 4, 4, 0).is_err());
        let frame = Frame::from_rgb(vec![0u8; 4 * 4 * 3], 4, 4, 7).unwrap();
        assert_eq!(frame.width(), 4);
        assert_eq!(frame.height(), 4);
        assert_eq!(frame.sequence, 7);
    }

    #[test]
    fn clone_is_an_independent_copy() {
        let mut frame = Frame::from_rgb(vec![0u8; 2 * 2 * 3], 2, 2, 0).unwrap();
        let copy = frame.clone();
        frame.image_mut().put_pixel(0, 0, image::Rgb([255, 0, 0]));
        assert_eq!(copy.image().get_pixel(0, 0).0, [0, 0, 0]);
    }
}
