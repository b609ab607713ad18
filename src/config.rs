use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::{ClassLabels, RemoteClassifierConfig};
use crate::deterrent::DeterrentSettings;
use crate::escalation::EscalationConfig;
use crate::ingest::CameraConfig;
use crate::rangefinder::{RangefinderTiming, DEFAULT_ECHO_LINE, DEFAULT_GPIO_ROOT, DEFAULT_TRIGGER_LINE};
use crate::tracker::TrackerConfig;

const DEFAULT_DETECTOR_URL: &str = "stub://detector";
const DEFAULT_INPUT_WIDTH: u32 = 416;
const DEFAULT_INPUT_HEIGHT: u32 = 416;
const DEFAULT_DETECTOR_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_DISPATCH_INTERVAL_MS: u64 = 1_500;
const DEFAULT_JPEG_QUALITY: u8 = 90;
const DEFAULT_CAMERA_SOURCE: &str = "stub://yard";
const DEFAULT_CAMERA_FPS: u32 = 30;
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_THRESHOLD_SECS: u64 = 10;
const DEFAULT_SOUND_ID: &str = "22khz";
const DEFAULT_PLAYER: &str = "aplay";
const DEFAULT_SOUND_DIR: &str = "sounds";
const DEFAULT_GRACE_PERIOD_MS: u64 = 1_000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_ECHO_TIMEOUT_MS: u64 = 1_000;
const DEFAULT_SIGNAL_PATH: &str = "detection_logs.txt";
const DEFAULT_PREVIEW_INTERVAL_MS: u64 = 1_000;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DeterrentConfigFile {
    detector: Option<DetectorConfigFile>,
    camera: Option<CameraConfigFile>,
    tracker: Option<TrackerConfigFile>,
    escalation: Option<EscalationConfigFile>,
    deterrent: Option<DeterrentConfigFileSection>,
    rangefinder: Option<RangefinderConfigFile>,
    signal_path: Option<PathBuf>,
    telemetry_path: Option<PathBuf>,
    preview: Option<PreviewConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectorConfigFile {
    url: Option<String>,
    api_key: Option<String>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    timeout_ms: Option<u64>,
    dispatch_interval_ms: Option<u64>,
    jpeg_quality: Option<u8>,
    unmarked_label: Option<String>,
    marked_label: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CameraConfigFile {
    source: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TrackerConfigFile {
    move_tolerance_px: Option<f32>,
    frequency_min_khz: Option<u32>,
    frequency_max_khz: Option<u32>,
    box_inflation: Option<f32>,
    stale_after_frames: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct EscalationConfigFile {
    threshold_secs: Option<u64>,
    sound_id: Option<String>,
    startup_sound_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DeterrentConfigFileSection {
    player: Option<String>,
    player_args: Option<Vec<String>>,
    sound_dir: Option<PathBuf>,
    sweep_pattern: Option<String>,
    sweep: Option<bool>,
    grace_period_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RangefinderConfigFile {
    enabled: Option<bool>,
    gpio_root: Option<PathBuf>,
    trigger_line: Option<u32>,
    echo_line: Option<u32>,
    poll_interval_ms: Option<u64>,
    echo_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PreviewConfigFile {
    path: Option<PathBuf>,
    interval_ms: Option<u64>,
    font_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct DeterrentConfig {
    pub detector: DetectorSettings,
    pub camera: CameraConfig,
    pub tracker: TrackerConfig,
    pub escalation: EscalationSettings,
    pub deterrent: DeterrentSettings,
    pub rangefinder: RangefinderSettings,
    pub signal_path: PathBuf,
    /// JSON-lines distance telemetry. Logged only when unset.
    pub telemetry_path: Option<PathBuf>,
    pub preview: PreviewSettings,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    /// `http(s)://...` for the remote model, `stub://...` for the offline stub.
    pub url: String,
    pub api_key: Option<String>,
    pub input_width: u32,
    pub input_height: u32,
    pub timeout: Duration,
    pub dispatch_interval: Duration,
    pub jpeg_quality: u8,
    pub labels: ClassLabels,
}

impl DetectorSettings {
    pub fn is_stub(&self) -> bool {
        self.url.starts_with("stub://")
    }

    pub fn classifier_config(&self) -> RemoteClassifierConfig {
        RemoteClassifierConfig {
            endpoint: self.url.clone(),
            api_key: self.api_key.clone(),
            input_width: self.input_width,
            input_height: self.input_height,
            timeout: self.timeout,
            jpeg_quality: self.jpeg_quality,
            labels: self.labels.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EscalationSettings {
    pub threshold: Duration,
    pub sound_id: String,
    /// Played once when the daemon starts.
    pub startup_sound_id: Option<String>,
}

impl EscalationSettings {
    pub fn machine_config(&self) -> EscalationConfig {
        EscalationConfig {
            threshold: self.threshold,
            sound_id: self.sound_id.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RangefinderSettings {
    pub enabled: bool,
    pub gpio_root: PathBuf,
    pub trigger_line: u32,
    pub echo_line: u32,
    pub poll_interval: Duration,
    pub echo_timeout: Duration,
}

impl RangefinderSettings {
    pub fn timing(&self) -> RangefinderTiming {
        RangefinderTiming {
            echo_timeout: self.echo_timeout,
            ..RangefinderTiming::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct PreviewSettings {
    pub path: Option<PathBuf>,
    pub interval: Duration,
    pub font_path: Option<PathBuf>,
}

impl DeterrentConfig {
    /// Defaults, then the JSON file named by `DETERRENT_CONFIG`, then
    /// `DETERRENT_*` environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = env_non_empty("DETERRENT_CONFIG").map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Like [`DeterrentConfig::load`] with an explicit config file.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self> {
        let file_cfg = match config_path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: DeterrentConfigFile) -> Self {
        let detector = file.detector.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        let tracker = file.tracker.unwrap_or_default();
        let escalation = file.escalation.unwrap_or_default();
        let deterrent = file.deterrent.unwrap_or_default();
        let rangefinder = file.rangefinder.unwrap_or_default();
        let preview = file.preview.unwrap_or_default();
        let tracker_defaults = TrackerConfig::default();
        let label_defaults = ClassLabels::default();

        let player = deterrent
            .player
            .unwrap_or_else(|| DEFAULT_PLAYER.to_string());
        let sweep_pattern = if deterrent.sweep.unwrap_or(true) {
            Some(deterrent.sweep_pattern.unwrap_or_else(|| player.clone()))
        } else {
            None
        };

        Self {
            detector: DetectorSettings {
                url: detector
                    .url
                    .unwrap_or_else(|| DEFAULT_DETECTOR_URL.to_string()),
                api_key: detector.api_key,
                input_width: detector.input_width.unwrap_or(DEFAULT_INPUT_WIDTH),
                input_height: detector.input_height.unwrap_or(DEFAULT_INPUT_HEIGHT),
                timeout: Duration::from_millis(
                    detector.timeout_ms.unwrap_or(DEFAULT_DETECTOR_TIMEOUT_MS),
                ),
                dispatch_interval: Duration::from_millis(
                    detector
                        .dispatch_interval_ms
                        .unwrap_or(DEFAULT_DISPATCH_INTERVAL_MS),
                ),
                jpeg_quality: detector.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
                labels: ClassLabels {
                    unmarked: detector.unmarked_label.unwrap_or(label_defaults.unmarked),
                    marked: detector.marked_label.unwrap_or(label_defaults.marked),
                },
            },
            camera: CameraConfig {
                source: camera
                    .source
                    .unwrap_or_else(|| DEFAULT_CAMERA_SOURCE.to_string()),
                target_fps: camera.target_fps.unwrap_or(DEFAULT_CAMERA_FPS),
                width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
            },
            tracker: TrackerConfig {
                move_tolerance_px: tracker
                    .move_tolerance_px
                    .unwrap_or(tracker_defaults.move_tolerance_px),
                frequency_min_khz: tracker
                    .frequency_min_khz
                    .unwrap_or(tracker_defaults.frequency_min_khz),
                frequency_max_khz: tracker
                    .frequency_max_khz
                    .unwrap_or(tracker_defaults.frequency_max_khz),
                box_inflation: tracker
                    .box_inflation
                    .unwrap_or(tracker_defaults.box_inflation),
                stale_after_frames: tracker
                    .stale_after_frames
                    .unwrap_or(tracker_defaults.stale_after_frames),
            },
            escalation: EscalationSettings {
                threshold: Duration::from_secs(
                    escalation.threshold_secs.unwrap_or(DEFAULT_THRESHOLD_SECS),
                ),
                sound_id: escalation
                    .sound_id
                    .unwrap_or_else(|| DEFAULT_SOUND_ID.to_string()),
                startup_sound_id: escalation.startup_sound_id,
            },
            deterrent: DeterrentSettings {
                player,
                player_args: deterrent.player_args.unwrap_or_default(),
                sound_dir: deterrent
                    .sound_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_SOUND_DIR)),
                sweep_pattern,
                grace_period: Duration::from_millis(
                    deterrent.grace_period_ms.unwrap_or(DEFAULT_GRACE_PERIOD_MS),
                ),
            },
            rangefinder: RangefinderSettings {
                enabled: rangefinder.enabled.unwrap_or(false),
                gpio_root: rangefinder
                    .gpio_root
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_GPIO_ROOT)),
                trigger_line: rangefinder.trigger_line.unwrap_or(DEFAULT_TRIGGER_LINE),
                echo_line: rangefinder.echo_line.unwrap_or(DEFAULT_ECHO_LINE),
                poll_interval: Duration::from_millis(
                    rangefinder
                        .poll_interval_ms
                        .unwrap_or(DEFAULT_POLL_INTERVAL_MS),
                ),
                echo_timeout: Duration::from_millis(
                    rangefinder.echo_timeout_ms.unwrap_or(DEFAULT_ECHO_TIMEOUT_MS),
                ),
            },
            signal_path: file
                .signal_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SIGNAL_PATH)),
            telemetry_path: file.telemetry_path,
            preview: PreviewSettings {
                path: preview.path,
                interval: Duration::from_millis(
                    preview.interval_ms.unwrap_or(DEFAULT_PREVIEW_INTERVAL_MS),
                ),
                font_path: preview.font_path,
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = env_non_empty("DETERRENT_DETECTOR_URL") {
            self.detector.url = url;
        }
        if let Some(key) = env_non_empty("DETERRENT_API_KEY") {
            self.detector.api_key = Some(key);
        }
        if let Some(source) = env_non_empty("DETERRENT_CAMERA") {
            self.camera.source = source;
        }
        if let Some(path) = env_non_empty("DETERRENT_SIGNAL_PATH") {
            self.signal_path = PathBuf::from(path);
        }
        if let Some(sound_id) = env_non_empty("DETERRENT_SOUND_ID") {
            self.escalation.sound_id = sound_id;
        }
        if let Some(dir) = env_non_empty("DETERRENT_SOUND_DIR") {
            self.deterrent.sound_dir = PathBuf::from(dir);
        }
        if let Some(path) = env_non_empty("DETERRENT_TELEMETRY_PATH") {
            self.telemetry_path = Some(PathBuf::from(path));
        }
        if let Some(threshold) = env_non_empty("DETERRENT_THRESHOLD_SECS") {
            let seconds: u64 = threshold.trim().parse().map_err(|_| {
                anyhow!("DETERRENT_THRESHOLD_SECS must be an integer number of seconds")
            })?;
            self.escalation.threshold = Duration::from_secs(seconds);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let detector = &self.detector;
        if !detector.is_stub()
            && !(detector.url.starts_with("http://") || detector.url.starts_with("https://"))
        {
            return Err(anyhow!(
                "detector url '{}' must be http(s):// or stub://",
                detector.url
            ));
        }
        if detector.input_width == 0 || detector.input_height == 0 {
            return Err(anyhow!("detector input size must be non-zero"));
        }
        if detector.timeout.is_zero() {
            return Err(anyhow!("detector timeout must be greater than zero"));
        }
        if detector.dispatch_interval.is_zero() {
            return Err(anyhow!("dispatch interval must be greater than zero"));
        }
        if !(1..=100).contains(&detector.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be within 1..=100"));
        }
        if detector.labels.unmarked.is_empty()
            || detector.labels.marked.is_empty()
            || detector.labels.unmarked == detector.labels.marked
        {
            return Err(anyhow!("class labels must be non-empty and distinct"));
        }

        if self.camera.target_fps == 0 || self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera fps and size must be non-zero"));
        }

        let tracker = &self.tracker;
        if !tracker.move_tolerance_px.is_finite() || tracker.move_tolerance_px < 0.0 {
            return Err(anyhow!("tracker move tolerance must be a non-negative number"));
        }
        if tracker.frequency_min_khz > tracker.frequency_max_khz {
            return Err(anyhow!(
                "tracker frequency band {}..{} is empty",
                tracker.frequency_min_khz,
                tracker.frequency_max_khz
            ));
        }
        if !tracker.box_inflation.is_finite() || tracker.box_inflation <= 0.0 {
            return Err(anyhow!("tracker box inflation must be positive"));
        }
        if tracker.stale_after_frames == 0 {
            return Err(anyhow!("tracker stale_after_frames must be greater than zero"));
        }

        if self.escalation.threshold.is_zero() {
            return Err(anyhow!("escalation threshold must be greater than zero"));
        }
        validate_sound_id(&self.escalation.sound_id)?;
        if let Some(startup) = &self.escalation.startup_sound_id {
            validate_sound_id(startup)?;
        }
        if self.deterrent.player.trim().is_empty() {
            return Err(anyhow!("deterrent player must not be empty"));
        }
        if let Some(pattern) = &self.deterrent.sweep_pattern {
            if pattern.trim().is_empty() {
                return Err(anyhow!("deterrent sweep pattern must not be empty"));
            }
        }

        let rangefinder = &self.rangefinder;
        if rangefinder.trigger_line == rangefinder.echo_line {
            return Err(anyhow!("rangefinder trigger and echo lines must differ"));
        }
        if rangefinder.poll_interval.is_zero() || rangefinder.echo_timeout.is_zero() {
            return Err(anyhow!("rangefinder intervals must be greater than zero"));
        }
        if self.preview.interval.is_zero() {
            return Err(anyhow!("preview interval must be greater than zero"));
        }
        Ok(())
    }
}

/// Sound ids name a file inside the sound directory.
fn validate_sound_id(sound_id: &str) -> Result<()> {
    if sound_id.is_empty()
        || sound_id.contains('/')
        || sound_id.contains('\\')
        || sound_id.starts_with('.')
    {
        return Err(anyhow!("invalid sound id '{}'", sound_id));
    }
    Ok(())
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<DeterrentConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() -> Result<()> {
        let cfg = DeterrentConfig::from_file(DeterrentConfigFile::default());
        cfg.validate()?;
        assert!(cfg.detector.is_stub());
        assert_eq!(cfg.detector.dispatch_interval, Duration::from_millis(1500));
        assert_eq!(cfg.escalation.threshold, Duration::from_secs(10));
        assert_eq!(cfg.deterrent.sweep_pattern.as_deref(), Some("aplay"));
        assert_eq!(cfg.rangefinder.trigger_line, 19);
        assert_eq!(cfg.rangefinder.echo_line, 38);
        assert_eq!(cfg.signal_path, PathBuf::from("detection_logs.txt"));
        Ok(())
    }

    #[test]
    fn sweep_follows_player_unless_disabled() -> Result<()> {
        let file: DeterrentConfigFile =
            serde_json::from_str(r#"{"deterrent": {"player": "paplay"}}"#)?;
        let cfg = DeterrentConfig::from_file(file);
        assert_eq!(cfg.deterrent.sweep_pattern.as_deref(), Some("paplay"));

        let file: DeterrentConfigFile =
            serde_json::from_str(r#"{"deterrent": {"sweep": false}}"#)?;
        assert!(DeterrentConfig::from_file(file).deterrent.sweep_pattern.is_none());
        Ok(())
    }

    #[test]
    fn rejects_path_like_sound_ids() {
        assert!(validate_sound_id("22khz").is_ok());
        assert!(validate_sound_id("../etc/passwd").is_err());
        assert!(validate_sound_id("a/b").is_err());
        assert!(validate_sound_id("").is_err());
    }

    #[test]
    fn rejects_unknown_fields() {
        let parsed: std::result::Result<DeterrentConfigFile, _> =
            serde_json::from_str(r#"{"detectr": {}}"#);
        assert!(parsed.is_err());
    }
}
