//! Failure taxonomy for the perception loop.
//!
//! Components return `anyhow::Result` and wrap one of these variants when the
//! caller needs to classify a failure. Sensor and detector failures are
//! recoverable and absorbed where they occur; only `FrameSourceFailure`
//! unwinds the control loop.

use std::time::Duration;

/// Which echo transition the rangefinder was waiting for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EchoEdge {
    Rising,
    Falling,
}

impl std::fmt::Display for EchoEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EchoEdge::Rising => write!(f, "echo did not go high"),
            EchoEdge::Falling => write!(f, "echo did not go low"),
        }
    }
}

#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PerceptionError {
    /// Rangefinder echo wait exceeded its deadline. The sample is dropped.
    SensorTimeout { edge: EchoEdge, waited: Duration },
    /// Remote classifier unreachable or answered with a non-200 status.
    DetectorUnavailable { reason: String },
    /// Deterrent player (or another child process) could not be spawned.
    ProcessLaunchFailure { program: String, reason: String },
    /// A child process could not be signalled or reaped.
    ProcessTerminationFailure { pid: u32, reason: String },
    /// Camera or stream read failure. Fatal to the control loop.
    FrameSourceFailure { reason: String },
}

impl PerceptionError {
    pub fn code(&self) -> &'static str {
        match self {
            PerceptionError::SensorTimeout { .. } => "sensor_timeout",
            PerceptionError::DetectorUnavailable { .. } => "detector_unavailable",
            PerceptionError::ProcessLaunchFailure { .. } => "process_launch_failure",
            PerceptionError::ProcessTerminationFailure { .. } => "process_termination_failure",
            PerceptionError::FrameSourceFailure { .. } => "frame_source_failure",
        }
    }

    /// Whether the control loop may continue after this failure.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, PerceptionError::FrameSourceFailure { .. })
    }
}

impl std::fmt::Display for PerceptionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PerceptionError::SensorTimeout { edge, waited } => {
                write!(f, "{}: {} within {:?}", self.code(), edge, waited)
            }
            PerceptionError::DetectorUnavailable { reason } => {
                write!(f, "{}: {}", self.code(), reason)
            }
            PerceptionError::ProcessLaunchFailure { program, reason } => {
                write!(f, "{}: {}: {}", self.code(), program, reason)
            }
            PerceptionError::ProcessTerminationFailure { pid, reason } => {
                write!(f, "{}: pid {}: {}", self.code(), pid, reason)
            }
            PerceptionError::FrameSourceFailure { reason } => {
                write!(f, "{}: {}", self.code(), reason)
            }
        }
    }
}

impl std::error::Error for PerceptionError {}

/// Returns the taxonomy entry carried by an `anyhow::Error`, if any.
pub fn classify(err: &anyhow::Error) -> Option<&PerceptionError> {
    err.downcast_ref::<PerceptionError>()
}
