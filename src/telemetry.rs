//! Distance telemetry records and sinks.
//!
//! Every poll produces a record carrying the trigger signal. Distance fields
//! are absent when no measurement was taken or it failed.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::rangefinder::DistanceSample;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DistanceRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub m: Option<f64>,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    /// Trigger signal value at sampling time.
    pub player: bool,
}

impl DistanceRecord {
    pub fn new(sample: DistanceSample, player: bool) -> Self {
        Self {
            cm: Some(sample.centimeters),
            m: Some(sample.meters),
            ..Self::presence(player)
        }
    }

    /// Record with the trigger signal only.
    pub fn presence(player: bool) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            cm: None,
            m: None,
            timestamp,
            player,
        }
    }
}

pub trait TelemetrySink: Send {
    fn emit(&mut self, record: &DistanceRecord) -> Result<()>;
}

impl<T: TelemetrySink + ?Sized> TelemetrySink for Box<T> {
    fn emit(&mut self, record: &DistanceRecord) -> Result<()> {
        (**self).emit(record)
    }
}

/// Appends one JSON object per line.
pub struct JsonLinesSink {
    path: PathBuf,
    file: File,
}

impl JsonLinesSink {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open telemetry file {}", path.display()))?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TelemetrySink for JsonLinesSink {
    fn emit(&mut self, record: &DistanceRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        self.file
            .write_all(&line)
            .with_context(|| format!("append telemetry to {}", self.path.display()))?;
        Ok(())
    }
}

/// Logs records at info level.
#[derive(Debug, Default)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn emit(&mut self, record: &DistanceRecord) -> Result<()> {
        match (record.cm, record.m) {
            (Some(cm), Some(m)) => {
                log::info!("distance {:.2} cm ({:.3} m) player={}", cm, m, record.player)
            }
            _ => log::info!("distance n/a player={}", record.player),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_lines_append() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("distance.jsonl");
        let sample = DistanceSample {
            centimeters: 34.3,
            meters: 0.343,
        };

        let mut sink = JsonLinesSink::open(&path)?;
        sink.emit(&DistanceRecord::new(sample, true))?;
        drop(sink);
        let mut sink = JsonLinesSink::open(&path)?;
        sink.emit(&DistanceRecord::new(sample, false))?;
        sink.emit(&DistanceRecord::presence(false))?;

        let content = std::fs::read_to_string(&path)?;
        let records: Vec<DistanceRecord> = content
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].cm, Some(34.3));
        assert_eq!(records[0].m, Some(0.343));
        assert!(records[0].player);
        assert!(!records[1].player);
        assert!(records[1].timestamp > 0);
        assert_eq!(records[2].cm, None);
        assert!(!records[2].player);
        assert!(!content.lines().nth(2).unwrap_or_default().contains("cm"));
        Ok(())
    }
}
