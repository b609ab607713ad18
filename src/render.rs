//! Frame overlay: tracked boxes, labels and the activation countdown.
//!
//! Overlay construction is pure; drawing goes through `imageproc`. Text needs
//! a TrueType font, so labels are only rasterised when one is configured.
//! Boxes are always drawn.

use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::{ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::detect::{ClassLabels, DetectionClass};
use crate::escalation::EscalationState;
use crate::tracker::{BoundingBox, TrackerFrame};

pub const UNMARKED_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const MARKED_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const COUNTDOWN_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const LABEL_SCALE: f32 = 18.0;
const COUNTDOWN_SCALE: f32 = 40.0;

#[derive(Clone, Debug, PartialEq)]
pub struct OverlayBox {
    pub bbox: BoundingBox,
    pub color: Rgb<u8>,
    /// `"<class> (<confidence>)"`.
    pub label: String,
    pub frequency_label: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Countdown {
    pub seconds: u64,
    pub anchors: Vec<(i32, i32)>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Overlay {
    pub boxes: Vec<OverlayBox>,
    pub countdown: Option<Countdown>,
    pub state: EscalationState,
}

pub fn class_color(class: &DetectionClass) -> Rgb<u8> {
    match class {
        DetectionClass::Unmarked => UNMARKED_COLOR,
        _ => MARKED_COLOR,
    }
}

/// Countdown appears only while accumulating with time left, anchored at
/// each unmarked box center.
pub fn build_overlay(
    tracked: &TrackerFrame,
    labels: &ClassLabels,
    state: EscalationState,
    remaining_secs: Option<u64>,
) -> Overlay {
    let color = class_color(&tracked.render_class);
    let boxes = tracked
        .boxes
        .iter()
        .map(|b| OverlayBox {
            bbox: b.bbox,
            color,
            label: format!("{} ({:.2})", labels.label_for(&b.key.class), b.confidence),
            frequency_label: format!("FREQUENCY {}kHz", b.frequency_khz),
        })
        .collect::<Vec<_>>();

    let countdown = match (state, remaining_secs) {
        (EscalationState::Accumulating, Some(seconds))
            if seconds > 0 && tracked.render_class == DetectionClass::Unmarked =>
        {
            Some(Countdown {
                seconds,
                anchors: boxes.iter().map(|b| b.bbox.center()).collect(),
            })
        }
        _ => None,
    };

    Overlay {
        boxes,
        countdown,
        state,
    }
}

#[derive(Default)]
pub struct OverlayRenderer {
    font: Option<FontVec>,
}

impl OverlayRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_font_file(path: &Path) -> Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("read font {}", path.display()))?;
        let font = FontVec::try_from_vec(bytes)
            .with_context(|| format!("parse font {}", path.display()))?;
        Ok(Self { font: Some(font) })
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    pub fn draw(&self, image: &mut RgbImage, overlay: &Overlay) {
        for b in &overlay.boxes {
            draw_box(image, &b.bbox, b.color);
            if let Some(font) = &self.font {
                let scale = PxScale::from(LABEL_SCALE);
                let text_y = b.bbox.y1.saturating_sub(LABEL_SCALE as i32 + 2);
                draw_text_mut(image, b.color, b.bbox.x1, text_y, scale, font, &b.label);
                draw_text_mut(
                    image,
                    b.color,
                    b.bbox.x1,
                    b.bbox.y2.saturating_add(2),
                    scale,
                    font,
                    &b.frequency_label,
                );
            }
        }

        if let (Some(countdown), Some(font)) = (&overlay.countdown, &self.font) {
            let text = countdown.seconds.to_string();
            for (x, y) in &countdown.anchors {
                draw_text_mut(
                    image,
                    COUNTDOWN_COLOR,
                    *x,
                    y.saturating_sub(COUNTDOWN_SCALE as i32 / 2),
                    PxScale::from(COUNTDOWN_SCALE),
                    font,
                    &text,
                );
            }
        }
    }
}

/// Two nested one-pixel rectangles give a two-pixel outline.
fn draw_box(image: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>) {
    for inset in 0..2 {
        let width = bbox.width().saturating_sub(2 * inset).max(1) as u32;
        let height = bbox.height().saturating_sub(2 * inset).max(1) as u32;
        let rect = Rect::at(bbox.x1.saturating_add(inset), bbox.y1.saturating_add(inset))
            .of_size(width, height);
        draw_hollow_rect_mut(image, rect, color);
    }
}

/// Periodically saves the annotated frame as a JPEG for headless devices.
pub struct PreviewWriter {
    path: PathBuf,
    interval: Duration,
    last_written: Option<Instant>,
}

impl PreviewWriter {
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            path: path.into(),
            interval,
            last_written: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns whether a file was written.
    pub fn maybe_write(&mut self, image: &RgbImage, now: Instant) -> Result<bool> {
        if let Some(last) = self.last_written {
            if now.saturating_duration_since(last) < self.interval {
                return Ok(false);
            }
        }
        let tmp = self.path.with_extension("tmp");
        image
            .save_with_format(&tmp, ImageFormat::Jpeg)
            .with_context(|| format!("write preview {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replace preview {}", self.path.display()))?;
        self.last_written = Some(now);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::{TrackKey, TrackedBox};

    fn tracked(class: DetectionClass, bbox: BoundingBox) -> TrackedBox {
        TrackedBox {
            key: TrackKey {
                class,
                x: bbox.center().0,
                y: bbox.center().1,
            },
            bbox,
            center: (bbox.center().0 as f32, bbox.center().1 as f32),
            confidence: 0.873,
            frequency_khz: 47,
            is_new: true,
        }
    }

    fn unmarked_frame() -> TrackerFrame {
        TrackerFrame {
            render_class: DetectionClass::Unmarked,
            boxes: vec![tracked(
                DetectionClass::Unmarked,
                BoundingBox {
                    x1: 10,
                    y1: 10,
                    x2: 30,
                    y2: 40,
                },
            )],
        }
    }

    #[test]
    fn labels_and_colors() {
        let overlay = build_overlay(
            &unmarked_frame(),
            &ClassLabels::default(),
            EscalationState::Idle,
            None,
        );
        let b = &overlay.boxes[0];
        assert_eq!(b.color, UNMARKED_COLOR);
        assert_eq!(b.label, "dog_without_collar (0.87)");
        assert_eq!(b.frequency_label, "FREQUENCY 47kHz");
        assert!(overlay.countdown.is_none());
    }

    #[test]
    fn countdown_only_while_accumulating_with_time_left() {
        let labels = ClassLabels::default();
        let frame = unmarked_frame();

        let overlay = build_overlay(&frame, &labels, EscalationState::Accumulating, Some(7));
        assert_eq!(
            overlay.countdown,
            Some(Countdown {
                seconds: 7,
                anchors: vec![(20, 25)]
            })
        );

        let overlay = build_overlay(&frame, &labels, EscalationState::Accumulating, Some(0));
        assert!(overlay.countdown.is_none());
        let overlay = build_overlay(&frame, &labels, EscalationState::Active, Some(0));
        assert!(overlay.countdown.is_none());
    }

    #[test]
    fn draws_two_pixel_outline_without_font() {
        let mut image = RgbImage::new(64, 64);
        let overlay = build_overlay(
            &unmarked_frame(),
            &ClassLabels::default(),
            EscalationState::Idle,
            None,
        );
        OverlayRenderer::new().draw(&mut image, &overlay);

        assert_eq!(*image.get_pixel(10, 20), UNMARKED_COLOR);
        assert_eq!(*image.get_pixel(11, 20), UNMARKED_COLOR);
        assert_eq!(*image.get_pixel(12, 20), Rgb([0, 0, 0]));
        assert_eq!(*image.get_pixel(20, 25), Rgb([0, 0, 0]));
    }

    #[test]
    fn boxes_off_frame_do_not_panic() {
        let mut image = RgbImage::new(16, 16);
        let frame = TrackerFrame {
            render_class: DetectionClass::Marked,
            boxes: vec![tracked(
                DetectionClass::Marked,
                BoundingBox {
                    x1: -40,
                    y1: 5,
                    x2: 100,
                    y2: 5,
                },
            )],
        };
        let overlay = build_overlay(&frame, &ClassLabels::default(), EscalationState::Idle, None);
        OverlayRenderer::new().draw(&mut image, &overlay);
        assert_eq!(overlay.boxes[0].color, MARKED_COLOR);
    }

    #[test]
    fn wild_detector_reply_renders_without_overflow() {
        use crate::detect::{Detection, DetectionBatch};
        use crate::tracker::{ObjectTracker, TrackerConfig};

        let batch = DetectionBatch::new(
            vec![Detection {
                class: DetectionClass::Unmarked,
                center_x: 1.0e12,
                center_y: 1.0e12,
                width: 80.0,
                height: 60.0,
                confidence: 0.9,
            }],
            (64, 48),
            (416, 416),
        );
        let tracked = ObjectTracker::new(TrackerConfig::default()).update(Some(&batch), 64, 48);
        let overlay = build_overlay(
            &tracked,
            &ClassLabels::default(),
            EscalationState::Accumulating,
            Some(5),
        );
        assert_eq!(overlay.countdown.as_ref().map(|c| c.anchors.clone()), Some(vec![(64, 48)]));

        let mut image = RgbImage::new(64, 48);
        OverlayRenderer::new().draw(&mut image, &overlay);
    }

    #[test]
    fn preview_respects_interval() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("preview.jpg");
        let mut writer = PreviewWriter::new(&path, Duration::from_secs(1));
        let image = RgbImage::new(8, 8);
        let t0 = Instant::now();

        assert!(writer.maybe_write(&image, t0)?);
        assert!(!writer.maybe_write(&image, t0 + Duration::from_millis(500))?);
        assert!(writer.maybe_write(&image, t0 + Duration::from_secs(1))?);
        assert!(path.exists());
        assert_eq!(image::open(&path)?.width(), 8);
        Ok(())
    }
}
