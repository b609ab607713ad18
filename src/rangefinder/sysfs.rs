use anyhow::{anyhow, Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::PulsePins;

pub const DEFAULT_GPIO_ROOT: &str = "/sys/class/gpio";
/// Jetson Nano BOARD pin 35.
pub const DEFAULT_TRIGGER_LINE: u32 = 19;
/// Jetson Nano BOARD pin 33.
pub const DEFAULT_ECHO_LINE: u32 = 38;

/// Time udev gets to create `gpioN/` after an export.
const EXPORT_WAIT: Duration = Duration::from_millis(500);

/// Trigger and echo lines through the Linux sysfs GPIO interface.
///
/// Lines that were not yet exported are exported on open and unexported on
/// drop; lines that were already exported are left as found.
pub struct SysfsPulsePins {
    trigger: SysfsLine,
    echo: SysfsLine,
}

impl SysfsPulsePins {
    pub fn open(root: impl AsRef<Path>, trigger_line: u32, echo_line: u32) -> Result<Self> {
        let root = root.as_ref();
        let trigger = SysfsLine::open(root, trigger_line, Direction::Out)?;
        let echo = SysfsLine::open(root, echo_line, Direction::In)?;
        log::info!(
            "rangefinder gpio ready (trigger={}, echo={}, root={})",
            trigger_line,
            echo_line,
            root.display()
        );
        Ok(Self { trigger, echo })
    }
}

impl PulsePins for SysfsPulsePins {
    fn set_trigger(&mut self, high: bool) -> Result<()> {
        self.trigger.write(high)
    }

    fn echo_high(&mut self) -> Result<bool> {
        self.echo.read()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    In,
    Out,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

struct SysfsLine {
    root: PathBuf,
    line: u32,
    value: File,
    exported_here: bool,
}

impl SysfsLine {
    fn open(root: &Path, line: u32, direction: Direction) -> Result<Self> {
        let dir = root.join(format!("gpio{}", line));
        let mut exported_here = false;
        if !dir.exists() {
            std::fs::write(root.join("export"), line.to_string())
                .with_context(|| format!("export gpio {}", line))?;
            exported_here = true;
            let deadline = Instant::now() + EXPORT_WAIT;
            while !dir.exists() {
                if Instant::now() >= deadline {
                    return Err(anyhow!(
                        "gpio {} did not appear under {} after export",
                        line,
                        root.display()
                    ));
                }
                std::thread::sleep(Duration::from_millis(10));
            }
        }

        std::fs::write(dir.join("direction"), direction.as_str())
            .with_context(|| format!("set gpio {} direction {}", line, direction.as_str()))?;
        let value = OpenOptions::new()
            .read(true)
            .write(direction == Direction::Out)
            .open(dir.join("value"))
            .with_context(|| format!("open gpio {} value", line))?;

        Ok(Self {
            root: root.to_path_buf(),
            line,
            value,
            exported_here,
        })
    }

    fn write(&mut self, high: bool) -> Result<()> {
        self.value
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.value.write_all(if high { b"1" } else { b"0" }))
            .with_context(|| format!("write gpio {}", self.line))
    }

    fn read(&mut self) -> Result<bool> {
        let mut level = [0u8; 1];
        self.value
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.value.read_exact(&mut level))
            .with_context(|| format!("read gpio {}", self.line))?;
        Ok(level[0] == b'1')
    }
}

impl Drop for SysfsLine {
    fn drop(&mut self) {
        if !self.exported_here {
            return;
        }
        if let Err(err) = std::fs::write(self.root.join("unexport"), self.line.to_string()) {
            log::warn!("failed to unexport gpio {}: {}", self.line, err);
        }
    }
}
