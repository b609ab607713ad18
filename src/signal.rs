//! Trigger signal file.
//!
//! A single line, `true` or `false`, shared with out-of-process consumers
//! (the control panel and the distance monitor). Reads are
//! case-insensitive; a missing file reads as `false`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub const DEFAULT_SIGNAL_PATH: &str = "detection_logs.txt";

#[derive(Clone, Debug)]
pub struct TriggerSignal {
    path: PathBuf,
}

impl TriggerSignal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the signal. The file is replaced atomically so readers never
    /// observe a truncated value.
    pub fn write(&self, active: bool) -> Result<()> {
        let line = if active { "true\n" } else { "false\n" };
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, line)
            .with_context(|| format!("write trigger signal {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replace trigger signal {}", self.path.display()))?;
        Ok(())
    }

    pub fn read(&self) -> Result<bool> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(content.trim().eq_ignore_ascii_case("true")),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(anyhow::Error::new(err)
                .context(format!("read trigger signal {}", self.path.display()))),
        }
    }

    /// Update the signal from one batch's class presence.
    ///
    /// Unmarked wins over marked. When neither class is present the file is
    /// left alone, so an empty batch never clears an earlier `true`.
    /// Returns the value written, if any.
    pub fn record_presence(&self, unmarked: bool, marked: bool) -> Result<Option<bool>> {
        let value = if unmarked {
            true
        } else if marked {
            false
        } else {
            return Ok(None);
        };
        self.write(value)?;
        Ok(Some(value))
    }
}
