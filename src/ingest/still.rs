//! Still-image source.
//!
//! Serves a copy of one decoded image as every frame. Useful for bench runs
//! against a fixed test picture.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;

use super::camera::{CameraConfig, CameraStats};
use crate::frame::Frame;

pub(super) struct StillImageSource {
    config: CameraConfig,
    image: Option<RgbImage>,
    frame_count: u64,
}

impl StillImageSource {
    pub(super) fn new(config: CameraConfig) -> Self {
        Self {
            config,
            image: None,
            frame_count: 0,
        }
    }

    pub(super) fn connect(&mut self) -> Result<()> {
        let image = image::open(&self.config.source)
            .with_context(|| format!("could not load image {}", self.config.source))?
            .into_rgb8();
        log::info!(
            "CameraSource: loaded still image {} ({}x{})",
            self.config.source,
            image.width(),
            image.height()
        );
        self.image = Some(image);
        Ok(())
    }

    pub(super) fn next_frame(&mut self) -> Result<Frame> {
        let image = self
            .image
            .as_ref()
            .ok_or_else(|| anyhow!("still image source not connected; call connect() first"))?;
        self.frame_count += 1;
        Ok(Frame::new(image.clone(), self.frame_count))
    }

    pub(super) fn is_healthy(&self) -> bool {
        self.image.is_some()
    }

    pub(super) fn stats(&self) -> CameraStats {
        CameraStats {
            frames_captured: self.frame_count,
            source: self.config.source.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::CameraSource;

    fn config_for(path: &std::path::Path) -> CameraConfig {
        CameraConfig {
            source: path.display().to_string(),
            target_fps: 0,
            width: 640,
            height: 480,
        }
    }

    #[test]
    fn serves_the_same_picture_every_frame() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("test.png");
        RgbImage::from_pixel(8, 6, image::Rgb([1, 2, 3])).save(&path)?;

        let mut source = CameraSource::new(config_for(&path))?;
        source.connect()?;
        let a = source.next_frame()?;
        let b = source.next_frame()?;
        assert_eq!((a.width(), a.height()), (8, 6));
        assert_eq!(a.image().as_raw(), b.image().as_raw());
        assert_eq!(b.sequence, 2);
        assert!(crate::ingest::FrameSource::is_healthy(&source));
        Ok(())
    }

    #[test]
    fn missing_image_fails_to_connect() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut source = CameraSource::new(config_for(&dir.path().join("absent.jpg")))?;
        assert!(source.connect().is_err());
        assert!(source.next_frame().is_err());
        assert!(!crate::ingest::FrameSource::is_healthy(&source));
        Ok(())
    }
}
