//! Camera source selection.
//!
//! `CameraSource` picks a backend from the configured source string:
//! - `stub://<name>`: synthetic scene, always available
//! - `/dev/video*`: V4L2 device (requires the ingest-v4l2 feature)
//! - anything else: path to a still image that is served as every frame

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};
use std::time::Instant;

use super::still::StillImageSource;
#[cfg(feature = "ingest-v4l2")]
use super::v4l2::V4l2Source;
use super::{frame_interval, FrameSource};
use crate::frame::Frame;

/// Configuration for the capture source.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// Source string (e.g., "/dev/video0", "stub://yard", "test.jpg").
    pub source: String,
    /// Target frame rate. Synthetic and still sources are paced to it.
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: "/dev/video0".to_string(),
            target_fps: 30,
            width: 640,
            height: 480,
        }
    }
}

pub struct CameraSource {
    backend: CameraBackend,
    target_fps: u32,
    last_frame_at: Option<Instant>,
}

enum CameraBackend {
    Synthetic(SyntheticCameraSource),
    Still(StillImageSource),
    #[cfg(feature = "ingest-v4l2")]
    V4l2(V4l2Source),
}

impl CameraSource {
    pub fn new(config: CameraConfig) -> Result<Self> {
        if config.source.trim().is_empty() {
            return Err(anyhow!("camera source must not be empty"));
        }
        let target_fps = config.target_fps;
        let backend = if config.source.starts_with("stub://") {
            CameraBackend::Synthetic(SyntheticCameraSource::new(config))
        } else if config.source.starts_with("/dev/video") {
            #[cfg(feature = "ingest-v4l2")]
            {
                CameraBackend::V4l2(V4l2Source::new(config)?)
            }
            #[cfg(not(feature = "ingest-v4l2"))]
            {
                return Err(anyhow!(
                    "camera device {} requires the ingest-v4l2 feature",
                    config.source
                ));
            }
        } else if config.source.contains("://") {
            return Err(anyhow!(
                "unsupported camera source '{}'; expected stub://, /dev/video* or an image path",
                config.source
            ));
        } else {
            CameraBackend::Still(StillImageSource::new(config))
        };
        Ok(Self {
            backend,
            target_fps,
            last_frame_at: None,
        })
    }

    /// Open the underlying device or file.
    pub fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.connect(),
            CameraBackend::Still(source) => source.connect(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::V4l2(source) => source.connect(),
        }
    }

    /// Capture the next frame.
    pub fn next_frame(&mut self) -> Result<Frame> {
        let frame = match &mut self.backend {
            CameraBackend::Synthetic(source) => {
                pace(self.last_frame_at, self.target_fps);
                source.next_frame()
            }
            CameraBackend::Still(source) => {
                pace(self.last_frame_at, self.target_fps);
                source.next_frame()
            }
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::V4l2(source) => source.next_frame(),
        }?;
        self.last_frame_at = Some(Instant::now());
        Ok(frame)
    }

    pub fn is_healthy(&self) -> bool {
        match &self.backend {
            CameraBackend::Synthetic(_) => true,
            CameraBackend::Still(source) => source.is_healthy(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::V4l2(source) => source.is_healthy(),
        }
    }

    pub fn stats(&self) -> CameraStats {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.stats(),
            CameraBackend::Still(source) => source.stats(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::V4l2(source) => source.stats(),
        }
    }
}

impl FrameSource for CameraSource {
    fn next_frame(&mut self) -> Result<Frame> {
        CameraSource::next_frame(self)
    }

    fn describe(&self) -> String {
        let stats = self.stats();
        format!("{} ({} frames)", stats.source, stats.frames_captured)
    }

    fn is_healthy(&self) -> bool {
        CameraSource::is_healthy(self)
    }
}

/// Statistics for a camera source.
#[derive(Clone, Debug)]
pub struct CameraStats {
    pub frames_captured: u64,
    pub source: String,
}

fn pace(last_frame_at: Option<Instant>, target_fps: u32) {
    let Some(last) = last_frame_at else {
        return;
    };
    let interval = frame_interval(target_fps);
    let elapsed = last.elapsed();
    if elapsed < interval {
        std::thread::sleep(interval - elapsed);
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

struct SyntheticCameraSource {
    config: CameraConfig,
    frame_count: u64,
}

impl SyntheticCameraSource {
    fn new(config: CameraConfig) -> Self {
        Self {
            config,
            frame_count: 0,
        }
    }

    fn connect(&mut self) -> Result<()> {
        log::info!("CameraSource: connected to {} (synthetic)", self.config.source);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        self.frame_count += 1;
        let image = self.generate_scene();
        Ok(Frame::new(image, self.frame_count))
    }

    /// Flat background with a block drifting one pixel per frame.
    fn generate_scene(&self) -> RgbImage {
        let (width, height) = (self.config.width.max(1), self.config.height.max(1));
        let mut image = RgbImage::from_pixel(width, height, Rgb([40, 90, 40]));
        let side = (width.min(height) / 6).max(1);
        let x0 = (self.frame_count as u32) % width;
        let y0 = height / 2;
        for y in y0..(y0 + side).min(height) {
            for x in x0..(x0 + side).min(width) {
                image.put_pixel(x, y, Rgb([150, 110, 70]));
            }
        }
        image
    }

    fn stats(&self) -> CameraStats {
        CameraStats {
            frames_captured: self.frame_count,
            source: self.config.source.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config() -> CameraConfig {
        CameraConfig {
            source: "stub://yard".to_string(),
            target_fps: 0,
            width: 64,
            height: 48,
        }
    }

    #[test]
    fn synthetic_source_produces_frames() -> Result<()> {
        let mut source = CameraSource::new(stub_config())?;
        source.connect()?;

        let frame = source.next_frame()?;
        assert_eq!(frame.width(), 64);
        assert_eq!(frame.height(), 48);
        assert_eq!(frame.sequence, 1);
        assert_eq!(source.stats().frames_captured, 1);
        assert!(FrameSource::is_healthy(&source));

        Ok(())
    }

    #[test]
    fn synthetic_scene_changes_between_frames() -> Result<()> {
        let mut source = CameraSource::new(stub_config())?;
        source.connect()?;

        let first = source.next_frame()?;
        let second = source.next_frame()?;
        assert_ne!(first.image().as_raw(), second.image().as_raw());

        Ok(())
    }

    #[test]
    fn rejects_unknown_url_schemes() {
        let config = CameraConfig {
            source: "rtsp://camera/stream".to_string(),
            ..stub_config()
        };
        assert!(CameraSource::new(config).is_err());
    }

    #[cfg(not(feature = "ingest-v4l2"))]
    #[test]
    fn device_paths_require_v4l2_feature() {
        let config = CameraConfig {
            source: "/dev/video0".to_string(),
            ..stub_config()
        };
        let err = CameraSource::new(config).err().expect("feature error");
        assert!(err.to_string().contains("ingest-v4l2"));
    }
}
