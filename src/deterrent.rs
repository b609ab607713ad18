//! Acoustic deterrent playback.
//!
//! The controller owns at most one player child. Every start sweeps player
//! instances it does not own off the device, so exactly one deterrent is
//! audible at a time. Restarting a different sound also tears down the own
//! handle. Stopping is graceful (SIGTERM, then SIGKILL after a grace period)
//! and always clears the handle.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use crate::error::PerceptionError;

pub const DEFAULT_PLAYER: &str = "aplay";
pub const DEFAULT_SOUND_DIR: &str = "sounds";
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(1);
const EXIT_POLL: Duration = Duration::from_millis(20);

/// Anything that can play and silence the deterrent.
pub trait Deterrent {
    fn start(&mut self, sound_id: &str) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    fn is_playing(&mut self) -> bool;
}

impl<D: Deterrent + ?Sized> Deterrent for Box<D> {
    fn start(&mut self, sound_id: &str) -> Result<()> {
        (**self).start(sound_id)
    }

    fn stop(&mut self) -> Result<()> {
        (**self).stop()
    }

    fn is_playing(&mut self) -> bool {
        (**self).is_playing()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DeterrentSettings {
    pub player: String,
    /// Arguments placed before the sound path.
    pub player_args: Vec<String>,
    pub sound_dir: PathBuf,
    /// `pgrep -f` pattern for the device-wide sweep. `None` disables it.
    pub sweep_pattern: Option<String>,
    pub grace_period: Duration,
}

impl Default for DeterrentSettings {
    fn default() -> Self {
        Self {
            player: DEFAULT_PLAYER.to_string(),
            player_args: Vec::new(),
            sound_dir: PathBuf::from(DEFAULT_SOUND_DIR),
            sweep_pattern: Some(DEFAULT_PLAYER.to_string()),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

impl DeterrentSettings {
    pub fn sound_path(&self, sound_id: &str) -> PathBuf {
        self.sound_dir.join(format!("{}.wav", sound_id))
    }
}

struct Playback {
    child: Child,
    sound_id: String,
    started_at: Instant,
}

pub struct DeterrentController {
    settings: DeterrentSettings,
    current: Option<Playback>,
}

impl DeterrentController {
    pub fn new(settings: DeterrentSettings) -> Self {
        Self {
            settings,
            current: None,
        }
    }

    pub fn settings(&self) -> &DeterrentSettings {
        &self.settings
    }

    /// Sound id of the live playback, if any.
    pub fn current_sound(&mut self) -> Option<&str> {
        self.reap_finished();
        self.current.as_ref().map(|p| p.sound_id.as_str())
    }

    /// Pid of the live player child.
    pub fn current_pid(&mut self) -> Option<u32> {
        self.reap_finished();
        self.current.as_ref().map(|p| p.child.id())
    }

    fn reap_finished(&mut self) {
        let finished = match self.current.as_mut() {
            Some(playback) => match playback.child.try_wait() {
                Ok(Some(status)) => {
                    log::debug!(
                        "deterrent '{}' finished after {:?} ({})",
                        playback.sound_id,
                        playback.started_at.elapsed(),
                        status
                    );
                    true
                }
                Ok(None) => false,
                Err(err) => {
                    log::warn!("deterrent status unavailable: {}", err);
                    true
                }
            },
            None => false,
        };
        if finished {
            self.current = None;
        }
    }

    fn force_kill_own(&mut self) {
        if let Some(mut playback) = self.current.take() {
            let pid = playback.child.id();
            if let Err(err) = playback.child.kill() {
                log::debug!("deterrent pid {} already gone: {}", pid, err);
            }
            if let Err(err) = playback.child.wait() {
                log::warn!("deterrent pid {} not reaped: {}", pid, err);
            }
        }
    }

    /// Kill every process matching the sweep pattern except this process and
    /// `keep`. Returns the number of processes killed.
    fn sweep(&self, keep: Option<u32>) -> usize {
        let Some(pattern) = self.settings.sweep_pattern.as_deref() else {
            return 0;
        };
        let output = match Command::new("pgrep")
            .arg("-f")
            .arg(pattern)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
        {
            Ok(output) => output,
            Err(err) => {
                log::warn!("player sweep '{}' failed to run: {}", pattern, err);
                return 0;
            }
        };
        // pgrep exits 1 when nothing matched.
        if !output.status.success() {
            if output.status.code() != Some(1) {
                log::warn!("player sweep '{}' exited with {}", pattern, output.status);
            }
            return 0;
        }

        let own = std::process::id();
        let mut killed = 0;
        for pid in String::from_utf8_lossy(&output.stdout)
            .split_whitespace()
            .filter_map(|token| token.parse::<u32>().ok())
            .filter(|pid| *pid != own && Some(*pid) != keep)
        {
            match force_kill(pid) {
                Ok(()) => {
                    log::info!("swept stray player pid {} ('{}')", pid, pattern);
                    killed += 1;
                }
                Err(err) => log::debug!("stray player pid {} not killed: {}", pid, err),
            }
        }
        killed
    }

    fn spawn(&self, sound_id: &str, path: &Path) -> Result<Child> {
        if !path.exists() {
            log::warn!("sound '{}' not found at {}", sound_id, path.display());
        }
        Command::new(&self.settings.player)
            .args(&self.settings.player_args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| {
                anyhow::Error::new(PerceptionError::ProcessLaunchFailure {
                    program: self.settings.player.clone(),
                    reason: err.to_string(),
                })
            })
    }
}

impl Deterrent for DeterrentController {
    /// Start `sound_id`. A call while the same sound is still playing keeps
    /// that playback and only sweeps foreign players.
    fn start(&mut self, sound_id: &str) -> Result<()> {
        if self.current_sound() == Some(sound_id) {
            let own = self.current_pid();
            self.sweep(own);
            return Ok(());
        }
        self.force_kill_own();
        self.sweep(None);

        let path = self.settings.sound_path(sound_id);
        let child = self.spawn(sound_id, &path)?;
        log::info!(
            "deterrent '{}' started (pid {}, {})",
            sound_id,
            child.id(),
            path.display()
        );
        self.current = Some(Playback {
            child,
            sound_id: sound_id.to_string(),
            started_at: Instant::now(),
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let Some(mut playback) = self.current.take() else {
            return Ok(());
        };
        let pid = playback.child.id();
        let termination_failure = |reason: String| {
            anyhow::Error::new(PerceptionError::ProcessTerminationFailure { pid, reason })
        };

        if let Ok(Some(_)) = playback.child.try_wait() {
            return Ok(());
        }
        if let Err(err) = request_termination(&mut playback.child) {
            log::debug!("deterrent pid {} did not take SIGTERM: {}", pid, err);
        }

        let deadline = Instant::now() + self.settings.grace_period;
        loop {
            match playback.child.try_wait() {
                Ok(Some(_)) => {
                    log::info!(
                        "deterrent '{}' stopped after {:?}",
                        playback.sound_id,
                        playback.started_at.elapsed()
                    );
                    return Ok(());
                }
                Ok(None) if Instant::now() < deadline => std::thread::sleep(EXIT_POLL),
                Ok(None) => break,
                Err(err) => return Err(termination_failure(err.to_string())),
            }
        }

        log::warn!(
            "deterrent pid {} ignored SIGTERM for {:?}; killing",
            pid,
            self.settings.grace_period
        );
        playback
            .child
            .kill()
            .map_err(|err| termination_failure(err.to_string()))?;
        playback
            .child
            .wait()
            .map_err(|err| termination_failure(err.to_string()))?;
        Ok(())
    }

    fn is_playing(&mut self) -> bool {
        self.reap_finished();
        self.current.is_some()
    }
}

impl Drop for DeterrentController {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::warn!("deterrent teardown: {:#}", err);
        }
    }
}

#[cfg(target_os = "linux")]
fn request_termination(child: &mut Child) -> std::io::Result<()> {
    let pid = libc::pid_t::try_from(child.id())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: kill(2) with a pid we spawned and have not yet reaped.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(target_os = "linux"))]
fn request_termination(child: &mut Child) -> std::io::Result<()> {
    child.kill()
}

#[cfg(target_os = "linux")]
fn force_kill(pid: u32) -> std::io::Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: kill(2) only signals; a pid that has already exited yields ESRCH.
    let rc = unsafe { libc::kill(pid, libc::SIGKILL) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(target_os = "linux"))]
fn force_kill(pid: u32) -> std::io::Result<()> {
    let status = Command::new("kill")
        .arg("-9")
        .arg(pid.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    if status.success() {
        Ok(())
    } else {
        Err(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("kill exited with {}", status),
        ))
    }
}
