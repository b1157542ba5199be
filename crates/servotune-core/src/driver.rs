//! Joint hardware boundary
//!
//! The identification stages talk to the actuator through the [`JointDriver`]
//! capability trait: encoder reads, low-level PID access, open-loop voltage
//! offsets and position commands. Implementations wrap real hardware; the
//! [`crate::simulation`] module provides a software joint for tests.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Driver-level failures.
#[derive(Debug, Clone, Error)]
pub enum DriverError {
    #[error("joint {0} is not served by this driver")]
    InvalidJoint(usize),
    #[error("operation requires {0} mode")]
    WrongMode(&'static str),
    #[error("hardware fault: {0}")]
    Hardware(String),
}

/// Low-level loop the joint is currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    /// Inner position PID active; references and offsets feed the loop.
    Position,
    /// PID bypassed; the commanded offset is applied as raw voltage.
    OpenLoop,
}

/// Parameter block of the joint's low-level position PID.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidParams {
    /// Proportional gain; its sign encodes the board's voltage polarity.
    pub kp: f64,
    /// Integral gain
    pub ki: f64,
    /// Derivative gain
    pub kd: f64,
    /// Integral (and output) saturation magnitude
    pub max_int: f64,
    /// Breakaway feed-forward applied when tracking upward [V]
    pub stiction_up: f64,
    /// Breakaway feed-forward applied when tracking downward [V]
    pub stiction_down: f64,
}

impl Default for PidParams {
    fn default() -> Self {
        Self {
            kp: 1.0,
            ki: 0.0,
            kd: 0.0,
            max_int: 1e3,
            stiction_up: 0.0,
            stiction_down: 0.0,
        }
    }
}

/// Capability surface the identification stages require from a joint.
///
/// Handles are shared (`Arc<dyn JointDriver>`) between the orchestrator and
/// the stiction estimator, so every method takes `&self`; implementations
/// guard their own state.
pub trait JointDriver: Send + Sync {
    /// Read the joint encoder [deg].
    fn encoder(&self, joint: usize) -> Result<f64, DriverError>;

    /// Hardware position limits (min, max) [deg].
    fn limits(&self, joint: usize) -> Result<(f64, f64), DriverError>;

    /// Read the low-level PID parameter block.
    fn pid(&self, joint: usize) -> Result<PidParams, DriverError>;

    /// Replace the low-level PID parameter block.
    fn set_pid(&self, joint: usize, pid: &PidParams) -> Result<(), DriverError>;

    /// Command a voltage offset [V]; raw voltage in open-loop mode.
    fn set_offset(&self, joint: usize, volts: f64) -> Result<(), DriverError>;

    /// Set the position-loop reference [deg].
    fn set_reference(&self, joint: usize, position: f64) -> Result<(), DriverError>;

    /// Current position-loop reference [deg].
    fn reference(&self, joint: usize) -> Result<f64, DriverError>;

    /// Voltage currently produced by the position loop [V].
    fn output(&self, joint: usize) -> Result<f64, DriverError>;

    /// Switch the joint to position mode.
    fn set_position_mode(&self, joint: usize) -> Result<(), DriverError>;

    /// Switch the joint to open-loop (raw voltage) mode.
    fn set_open_loop_mode(&self, joint: usize) -> Result<(), DriverError>;

    /// Current control mode.
    fn control_mode(&self, joint: usize) -> Result<ControlMode, DriverError>;

    /// Start a profiled move toward `target` [deg].
    fn position_move(&self, joint: usize, target: f64) -> Result<(), DriverError>;

    /// Profile speed for `position_move` [deg/s].
    fn set_ref_speed(&self, joint: usize, speed: f64) -> Result<(), DriverError>;

    /// Profile acceleration for `position_move` [deg/s^2].
    fn set_ref_acceleration(&self, joint: usize, acc: f64) -> Result<(), DriverError>;

    /// Abort any profiled move.
    fn stop(&self, joint: usize) -> Result<(), DriverError>;
}

/// Voltage polarity of the joint: the multiplier turning an internally
/// positive command (one that should raise the position) into driver volts.
pub fn voltage_polarity(pid: &PidParams) -> f64 {
    if pid.kp >= 0.0 {
        1.0
    } else {
        -1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polarity_follows_kp_sign() {
        let mut pid = PidParams::default();
        pid.kp = 10.0;
        assert_eq!(voltage_polarity(&pid), 1.0);
        pid.kp = -10.0;
        assert_eq!(voltage_polarity(&pid), -1.0);
        pid.kp = 0.0;
        assert_eq!(voltage_polarity(&pid), 1.0);
    }
}
