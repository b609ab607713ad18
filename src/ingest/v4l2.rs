//! V4L2 camera source.
//!
//! Captures from a local device node (e.g., /dev/video0). RGB3 is requested
//! first; devices that only offer MJPG are decoded in-memory.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;
use std::time::{Duration, Instant};

use super::camera::{CameraConfig, CameraStats};
use crate::frame::Frame;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WireFormat {
    Rgb24,
    Mjpeg,
}

pub struct V4l2Source {
    config: CameraConfig,
    state: Option<DeviceState>,
    wire_format: WireFormat,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub fn new(config: CameraConfig) -> Result<Self> {
        Ok(Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            wire_format: WireFormat::Rgb24,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
        })
    }

    pub fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.config.source)
            .with_context(|| format!("open v4l2 device {}", self.config.source))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    self.config.source,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        self.wire_format = match &format.fourcc.repr {
            b"RGB3" => WireFormat::Rgb24,
            b"MJPG" => WireFormat::Mjpeg,
            other => {
                return Err(anyhow!(
                    "v4l2 device {} delivers unsupported format {}",
                    self.config.source,
                    String::from_utf8_lossy(other)
                ))
            }
        };

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.config.source,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;
        self.last_error = None;

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()
        .map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;
        self.state = Some(state);

        log::info!(
            "V4l2Source: connected to {} ({}x{}, {:?})",
            self.config.source,
            self.active_width,
            self.active_height,
            self.wire_format
        );
        Ok(())
    }

    pub fn next_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let buf = state
            .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()))
            .map_err(|err| {
                self.last_error = Some(err.to_string());
                anyhow::Error::new(err).context("capture v4l2 frame")
            })?;

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());

        match self.wire_format {
            WireFormat::Rgb24 => Frame::from_rgb(
                buf,
                self.active_width,
                self.active_height,
                self.frame_count,
            ),
            WireFormat::Mjpeg => {
                let image = image::load_from_memory(&buf)
                    .context("decode mjpeg frame")?
                    .into_rgb8();
                Ok(Frame::new(image, self.frame_count))
            }
        }
    }

    pub fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    pub fn stats(&self) -> CameraStats {
        CameraStats {
            frames_captured: self.frame_count,
            source: self.config.source.clone(),
        }
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.config.target_fps == 0 {
            2_000
        } else {
            (1000 / self.config.target_fps).saturating_mul(6)
        };
        Duration::from_millis(base_ms.max(2_000) as u64)
    }
}
