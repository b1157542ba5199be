//! Minimum-jerk reference generation
//!
//! Generates a smooth point-to-point reference by integrating the
//! third-order feedback form of the minimum-jerk trajectory,
//!
//!   jerk = -(60/T^3) (p - target) - (36/T^2) v - (9/T) a,
//!
//! which approaches the target with near-zero velocity and acceleration in
//! roughly the execution time T. The target can be moved at every sample.

use nalgebra::SVector;

use crate::math::rk4;

/// Minimum-jerk point-to-point reference generator.
#[derive(Debug, Clone)]
pub struct MinJerkGenerator {
    /// Sample period [s]
    ts: f64,
    /// Execution time [s]
    t_exec: f64,
    /// (position, velocity, acceleration)
    state: SVector<f64, 3>,
}

impl MinJerkGenerator {
    /// # Arguments
    /// * `ts` - Sample period [s], > 0
    /// * `t_exec` - Execution time [s], > 0
    pub fn new(ts: f64, t_exec: f64) -> Self {
        assert!(ts > 0.0 && t_exec > 0.0);
        Self {
            ts,
            t_exec,
            state: SVector::zeros(),
        }
    }

    /// Restart from `pos` at rest.
    pub fn init(&mut self, pos: f64) {
        self.state = SVector::from([pos, 0.0, 0.0]);
    }

    pub fn set_ts(&mut self, ts: f64) {
        assert!(ts > 0.0);
        self.ts = ts;
    }

    pub fn set_execution_time(&mut self, t_exec: f64) {
        assert!(t_exec > 0.0);
        self.t_exec = t_exec;
    }

    pub fn execution_time(&self) -> f64 {
        self.t_exec
    }

    /// Advance one sample toward `target`.
    pub fn advance(&mut self, target: f64) {
        let t = self.t_exec;
        let (c0, c1, c2) = (60.0 / (t * t * t), 36.0 / (t * t), 9.0 / t);
        self.state = rk4(&self.state, 0.0, self.ts, |_t, s| {
            SVector::from([
                s[1],
                s[2],
                -c0 * (s[0] - target) - c1 * s[1] - c2 * s[2],
            ])
        });
    }

    pub fn pos(&self) -> f64 {
        self.state[0]
    }

    pub fn vel(&self) -> f64 {
        self.state[1]
    }

    pub fn acc(&self) -> f64 {
        self.state[2]
    }
}
