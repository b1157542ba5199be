//! Simulated joint driver
//!
//! Integrates the voltage-to-position plant p'' + p'/tau = (K/tau) u with
//! directional breakaway friction and exposes it through [`JointDriver`].
//! Supports both manually stepped operation (deterministic tests) and
//! wall-clock stepping for use under the periodic identification tasks.

use std::sync::Mutex;
use std::time::Instant;

use crate::driver::{ControlMode, DriverError, JointDriver, PidParams};
use crate::simulation::NoiseRng;

/// Velocity magnitude below which the joint counts as stuck [deg/s].
const STICK_EPS: f64 = 1e-3;

/// Integration substep [s].
const SUBSTEP: f64 = 1e-3;

/// Physical parameters of the simulated joint.
#[derive(Debug, Clone)]
pub struct SimJointParams {
    /// Joint index served by the driver
    pub joint: usize,
    /// Time constant [s]
    pub tau: f64,
    /// DC gain [deg/s/V]
    pub k: f64,
    /// Breakaway voltage for upward motion [V]
    pub stiction_up: f64,
    /// Breakaway voltage for downward motion [V] (negative)
    pub stiction_down: f64,
    /// Hardware limits (min, max) [deg]
    pub limits: (f64, f64),
    /// Encoder noise standard deviation [deg]
    pub noise_std: f64,
    /// Initial low-level PID block
    pub pid: PidParams,
}

impl Default for SimJointParams {
    fn default() -> Self {
        Self {
            joint: 0,
            tau: 0.1,
            k: 2.0,
            stiction_up: 0.0,
            stiction_down: 0.0,
            limits: (-50.0, 50.0),
            noise_std: 0.0,
            pid: PidParams {
                kp: 10.0,
                ..Default::default()
            },
        }
    }
}

#[derive(Debug)]
struct SimState {
    pos: f64,
    vel: f64,
    mode: ControlMode,
    offset: f64,
    reference: f64,
    target: f64,
    ref_speed: f64,
    ref_acc: f64,
    last_output: f64,
    pid: PidParams,
    rng: NoiseRng,
    last_wall: Option<Instant>,
}

/// Software joint implementing the full driver surface.
pub struct SimulatedJoint {
    params: SimJointParams,
    real_time: bool,
    state: Mutex<SimState>,
}

impl SimulatedJoint {
    pub fn new(params: SimJointParams) -> Self {
        let state = SimState {
            pos: 0.0,
            vel: 0.0,
            mode: ControlMode::Position,
            offset: 0.0,
            reference: 0.0,
            target: 0.0,
            ref_speed: 1e9,
            ref_acc: 1e9,
            last_output: 0.0,
            pid: params.pid,
            rng: NoiseRng::default(),
            last_wall: None,
        };
        Self {
            params,
            real_time: false,
            state: Mutex::new(state),
        }
    }

    /// Advance the plant from wall-clock time on every encoder read, for use
    /// under free-running periodic tasks.
    pub fn with_real_time(mut self) -> Self {
        self.real_time = true;
        self
    }

    /// Advance the simulation by `dt` seconds.
    pub fn step(&self, dt: f64) {
        let mut st = self.state.lock().unwrap();
        self.advance(&mut st, dt);
    }

    /// Plant position without encoder noise [deg].
    pub fn position(&self) -> f64 {
        self.state.lock().unwrap().pos
    }

    /// Plant velocity [deg/s].
    pub fn velocity(&self) -> f64 {
        self.state.lock().unwrap().vel
    }

    /// Teleport the plant (tests only).
    pub fn set_state(&self, pos: f64, vel: f64) {
        let mut st = self.state.lock().unwrap();
        st.pos = pos;
        st.vel = vel;
        st.reference = pos;
        st.target = pos;
    }

    /// Last voltage offset written through the driver interface [V].
    pub fn last_offset(&self) -> f64 {
        self.state.lock().unwrap().offset
    }

    fn polarity(pid: &PidParams) -> f64 {
        if pid.kp >= 0.0 {
            1.0
        } else {
            -1.0
        }
    }

    fn advance(&self, st: &mut SimState, dt: f64) {
        let mut remaining = dt;
        while remaining > 0.0 {
            let h = remaining.min(SUBSTEP);
            self.substep(st, h);
            remaining -= h;
        }
    }

    fn substep(&self, st: &mut SimState, dt: f64) {
        let p = &self.params;
        let pol = Self::polarity(&st.pid);

        // profiled reference motion toward the move target
        let dref_max = st.ref_speed.abs() * dt;
        st.reference += (st.target - st.reference).clamp(-dref_max, dref_max);

        // commanded voltage; u_phys is in the raises-position convention
        let (u_phys, output) = match st.mode {
            ControlMode::OpenLoop => (pol * st.offset, st.offset),
            ControlMode::Position => {
                let e = st.reference - st.pos;
                let ff = if e > 0.0 {
                    st.pid.stiction_up
                } else if e < 0.0 {
                    st.pid.stiction_down
                } else {
                    0.0
                };
                let cmd = (st.pid.kp.abs() * e + ff + pol * st.offset)
                    .clamp(-st.pid.max_int, st.pid.max_int);
                (cmd, pol * cmd)
            }
        };
        st.last_output = output;

        // breakaway friction: stuck until the drive exceeds the directional
        // threshold, constant opposing drop while moving
        let (s_up, s_dn) = (p.stiction_up, p.stiction_down);
        let drive = if st.vel.abs() > STICK_EPS {
            u_phys - if st.vel > 0.0 { s_up } else { s_dn }
        } else if u_phys > s_up {
            u_phys - s_up
        } else if u_phys < s_dn {
            u_phys - s_dn
        } else {
            0.0
        };

        // exact zero-order-hold step of the linear plant
        let a = 1.0 / p.tau;
        let b = p.k / p.tau;
        let exp = (-dt * a).exp();
        let exp_1 = 1.0 - exp;
        st.pos += exp_1 / a * st.vel + b * (a * dt - exp_1) / (a * a) * drive;
        st.vel = exp * st.vel + b * exp_1 / a * drive;

        // hard stops
        if st.pos <= p.limits.0 {
            st.pos = p.limits.0;
            st.vel = st.vel.max(0.0);
        } else if st.pos >= p.limits.1 {
            st.pos = p.limits.1;
            st.vel = st.vel.min(0.0);
        }
    }

    fn check(&self, joint: usize) -> Result<(), DriverError> {
        if joint == self.params.joint {
            Ok(())
        } else {
            Err(DriverError::InvalidJoint(joint))
        }
    }
}

impl JointDriver for SimulatedJoint {
    fn encoder(&self, joint: usize) -> Result<f64, DriverError> {
        self.check(joint)?;
        let mut st = self.state.lock().unwrap();
        if self.real_time {
            let now = Instant::now();
            if let Some(last) = st.last_wall {
                let dt = now.duration_since(last).as_secs_f64().min(0.2);
                self.advance(&mut st, dt);
            }
            st.last_wall = Some(now);
        }
        let noise = self.params.noise_std;
        let sample = st.rng.gaussian(noise);
        Ok(st.pos + sample)
    }

    fn limits(&self, joint: usize) -> Result<(f64, f64), DriverError> {
        self.check(joint)?;
        Ok(self.params.limits)
    }

    fn pid(&self, joint: usize) -> Result<PidParams, DriverError> {
        self.check(joint)?;
        Ok(self.state.lock().unwrap().pid)
    }

    fn set_pid(&self, joint: usize, pid: &PidParams) -> Result<(), DriverError> {
        self.check(joint)?;
        self.state.lock().unwrap().pid = *pid;
        Ok(())
    }

    fn set_offset(&self, joint: usize, volts: f64) -> Result<(), DriverError> {
        self.check(joint)?;
        self.state.lock().unwrap().offset = volts;
        Ok(())
    }

    fn set_reference(&self, joint: usize, position: f64) -> Result<(), DriverError> {
        self.check(joint)?;
        let mut st = self.state.lock().unwrap();
        st.reference = position;
        st.target = position;
        Ok(())
    }

    fn reference(&self, joint: usize) -> Result<f64, DriverError> {
        self.check(joint)?;
        Ok(self.state.lock().unwrap().reference)
    }

    fn output(&self, joint: usize) -> Result<f64, DriverError> {
        self.check(joint)?;
        Ok(self.state.lock().unwrap().last_output)
    }

    fn set_position_mode(&self, joint: usize) -> Result<(), DriverError> {
        self.check(joint)?;
        let mut st = self.state.lock().unwrap();
        st.mode = ControlMode::Position;
        // bumpless entry: hold the current position
        st.reference = st.pos;
        st.target = st.pos;
        Ok(())
    }

    fn set_open_loop_mode(&self, joint: usize) -> Result<(), DriverError> {
        self.check(joint)?;
        self.state.lock().unwrap().mode = ControlMode::OpenLoop;
        Ok(())
    }

    fn control_mode(&self, joint: usize) -> Result<ControlMode, DriverError> {
        self.check(joint)?;
        Ok(self.state.lock().unwrap().mode)
    }

    fn position_move(&self, joint: usize, target: f64) -> Result<(), DriverError> {
        self.check(joint)?;
        let mut st = self.state.lock().unwrap();
        if st.mode != ControlMode::Position {
            return Err(DriverError::WrongMode("position"));
        }
        st.target = target;
        Ok(())
    }

    fn set_ref_speed(&self, joint: usize, speed: f64) -> Result<(), DriverError> {
        self.check(joint)?;
        self.state.lock().unwrap().ref_speed = speed;
        Ok(())
    }

    fn set_ref_acceleration(&self, joint: usize, acc: f64) -> Result<(), DriverError> {
        self.check(joint)?;
        self.state.lock().unwrap().ref_acc = acc;
        Ok(())
    }

    fn stop(&self, joint: usize) -> Result<(), DriverError> {
        self.check(joint)?;
        let mut st = self.state.lock().unwrap();
        st.target = st.reference;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn frictionless() -> SimulatedJoint {
        SimulatedJoint::new(SimJointParams::default())
    }

    #[test]
    fn test_open_loop_step_response() {
        let joint = frictionless();
        joint.set_open_loop_mode(0).unwrap();
        joint.set_offset(0, 1.0).unwrap();
        // after many time constants the velocity settles at K*u
        joint.step(1.0);
        assert_relative_eq!(joint.velocity(), 2.0, epsilon = 1e-3);
    }

    #[test]
    fn test_polarity_inverts_response() {
        let mut params = SimJointParams::default();
        params.pid.kp = -10.0;
        let joint = SimulatedJoint::new(params);
        joint.set_open_loop_mode(0).unwrap();
        // negative-polarity board: positive volts drive the position down
        joint.set_offset(0, 1.0).unwrap();
        joint.step(1.0);
        assert!(joint.position() < 0.0);
    }

    #[test]
    fn test_stuck_below_breakaway() {
        let mut params = SimJointParams::default();
        params.stiction_up = 0.8;
        params.stiction_down = -0.5;
        let joint = SimulatedJoint::new(params);
        joint.set_open_loop_mode(0).unwrap();

        joint.set_offset(0, 0.7).unwrap();
        joint.step(1.0);
        assert_relative_eq!(joint.position(), 0.0);

        joint.set_offset(0, 1.0).unwrap();
        joint.step(1.0);
        assert!(joint.position() > 0.0);
    }

    #[test]
    fn test_position_mode_tracks_reference() {
        let joint = frictionless();
        joint.set_reference(0, 10.0).unwrap();
        joint.step(2.0);
        assert_relative_eq!(joint.position(), 10.0, epsilon = 0.01);
        assert_eq!(joint.control_mode(0).unwrap(), ControlMode::Position);
    }

    #[test]
    fn test_profiled_move_obeys_ref_speed() {
        let joint = frictionless();
        joint.set_ref_speed(0, 5.0).unwrap();
        joint.position_move(0, 10.0).unwrap();
        joint.step(1.0);
        // reference has advanced 5 deg after 1 s
        assert_relative_eq!(joint.reference(0).unwrap(), 5.0, epsilon = 1e-9);
        joint.stop(0).unwrap();
        joint.step(1.0);
        assert_relative_eq!(joint.reference(0).unwrap(), 5.0, epsilon = 1e-9);
    }

    #[test]
    fn test_hard_stops_clamp() {
        let joint = frictionless();
        joint.set_open_loop_mode(0).unwrap();
        joint.set_offset(0, 100.0).unwrap();
        joint.step(5.0);
        assert_relative_eq!(joint.position(), 50.0);
    }

    #[test]
    fn test_wrong_joint_rejected() {
        let joint = frictionless();
        assert!(matches!(
            joint.encoder(3),
            Err(DriverError::InvalidJoint(3))
        ));
    }

    #[test]
    fn test_position_move_requires_position_mode() {
        let joint = frictionless();
        joint.set_open_loop_mode(0).unwrap();
        assert!(joint.position_move(0, 5.0).is_err());
    }
}
