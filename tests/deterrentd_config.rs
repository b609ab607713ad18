use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use edge_deterrent::config::DeterrentConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "DETERRENT_CONFIG",
        "DETERRENT_DETECTOR_URL",
        "DETERRENT_API_KEY",
        "DETERRENT_CAMERA",
        "DETERRENT_SIGNAL_PATH",
        "DETERRENT_SOUND_ID",
        "DETERRENT_SOUND_DIR",
        "DETERRENT_THRESHOLD_SECS",
        "DETERRENT_TELEMETRY_PATH",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "detector": {
            "url": "https://detect.example.com/dogs/3",
            "api_key": "file-key",
            "timeout_ms": 2500,
            "dispatch_interval_ms": 2000,
            "unmarked_label": "stray",
            "marked_label": "pet"
        },
        "camera": {
            "source": "stub://porch",
            "target_fps": 15,
            "width": 800,
            "height": 600
        },
        "tracker": {
            "move_tolerance_px": 8.0,
            "stale_after_frames": 30
        },
        "escalation": {
            "threshold_secs": 20,
            "sound_id": "25khz",
            "startup_sound_id": "chime"
        },
        "deterrent": {
            "player": "paplay",
            "grace_period_ms": 250
        },
        "rangefinder": {
            "enabled": true,
            "trigger_line": 12,
            "echo_line": 13
        },
        "signal_path": "/tmp/signal.txt"
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("DETERRENT_CONFIG", file.path());
    std::env::set_var("DETERRENT_API_KEY", "env-key");
    std::env::set_var("DETERRENT_SOUND_ID", "30khz");
    std::env::set_var("DETERRENT_THRESHOLD_SECS", "15");
    std::env::set_var("DETERRENT_TELEMETRY_PATH", "/tmp/distance.jsonl");

    let cfg = DeterrentConfig::load().expect("load config");

    assert_eq!(cfg.detector.url, "https://detect.example.com/dogs/3");
    assert_eq!(cfg.detector.api_key.as_deref(), Some("env-key"));
    assert_eq!(cfg.detector.timeout, Duration::from_millis(2500));
    assert_eq!(cfg.detector.dispatch_interval, Duration::from_secs(2));
    assert_eq!(cfg.detector.labels.unmarked, "stray");
    assert_eq!(cfg.detector.labels.marked, "pet");
    assert_eq!(cfg.camera.source, "stub://porch");
    assert_eq!(cfg.camera.target_fps, 15);
    assert_eq!((cfg.camera.width, cfg.camera.height), (800, 600));
    assert_eq!(cfg.tracker.move_tolerance_px, 8.0);
    assert_eq!(cfg.tracker.stale_after_frames, 30);
    assert_eq!(cfg.tracker.frequency_min_khz, 40);
    assert_eq!(cfg.escalation.threshold, Duration::from_secs(15));
    assert_eq!(cfg.escalation.sound_id, "30khz");
    assert_eq!(cfg.escalation.startup_sound_id.as_deref(), Some("chime"));
    assert_eq!(cfg.deterrent.player, "paplay");
    assert_eq!(cfg.deterrent.sweep_pattern.as_deref(), Some("paplay"));
    assert_eq!(cfg.deterrent.grace_period, Duration::from_millis(250));
    assert!(cfg.rangefinder.enabled);
    assert_eq!((cfg.rangefinder.trigger_line, cfg.rangefinder.echo_line), (12, 13));
    assert_eq!(cfg.signal_path, PathBuf::from("/tmp/signal.txt"));
    assert_eq!(cfg.telemetry_path, Some(PathBuf::from("/tmp/distance.jsonl")));

    clear_env();
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = DeterrentConfig::load().expect("load defaults");
    assert_eq!(cfg.detector.url, "stub://detector");
    assert_eq!(cfg.camera.source, "stub://yard");
    assert_eq!(cfg.escalation.threshold, Duration::from_secs(10));
    assert_eq!(cfg.escalation.sound_id, "22khz");
    assert!(!cfg.rangefinder.enabled);
    assert!(cfg.telemetry_path.is_none());
    assert!(cfg.preview.path.is_none());
}

#[test]
fn rejects_invalid_threshold_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("DETERRENT_THRESHOLD_SECS", "ten");
    let err = DeterrentConfig::load().unwrap_err();
    assert!(err.to_string().contains("DETERRENT_THRESHOLD_SECS"));

    std::env::set_var("DETERRENT_THRESHOLD_SECS", "0");
    assert!(DeterrentConfig::load().is_err());

    clear_env();
}

#[test]
fn rejects_non_http_detector_url() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("DETERRENT_DETECTOR_URL", "ftp://detector");
    let err = DeterrentConfig::load().unwrap_err();
    assert!(err.to_string().contains("http(s)://"));

    clear_env();
}

#[test]
fn rejects_same_rangefinder_lines() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(
        &mut file,
        br#"{"rangefinder": {"trigger_line": 7, "echo_line": 7}}"#,
    )
    .expect("write config");
    let err = DeterrentConfig::load_from(Some(file.path())).unwrap_err();
    assert!(err.to_string().contains("must differ"));
}
