//! Parallel-form PID
//!
//! Discrete PID with independent set-point weights per term, a first-order
//! filtered derivative, output saturation and back-calculation anti-windup.
//! Used as the inner position loop during stiction identification.

use nalgebra::Vector1;
use serde::{Deserialize, Serialize};

use crate::math::Integrator;

/// Gains and shaping parameters of a [`ParallelPid`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PidGains {
    /// Proportional gain
    pub kp: f64,
    /// Integral gain
    pub ki: f64,
    /// Derivative gain
    pub kd: f64,
    /// Proportional set-point weight
    pub wp: f64,
    /// Integral set-point weight
    pub wi: f64,
    /// Derivative set-point weight
    pub wd: f64,
    /// Derivative filter divisor
    pub n: f64,
    /// Anti-windup tracking time [s]
    pub tt: f64,
}

impl PidGains {
    pub fn pid(kp: f64, ki: f64, kd: f64) -> Self {
        Self {
            kp,
            ki,
            kd,
            ..Default::default()
        }
    }
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            kp: 1.0,
            ki: 0.0,
            kd: 0.0,
            wp: 1.0,
            wi: 1.0,
            wd: 1.0,
            n: 10.0,
            tt: 1.0,
        }
    }
}

/// Parallel PID with saturated output.
#[derive(Debug, Clone)]
pub struct ParallelPid {
    gains: PidGains,
    ts: f64,
    sat: (f64, f64),
    integral: Integrator<1>,
    d_state: f64,
    ed_old: f64,
}

impl ParallelPid {
    /// # Arguments
    /// * `ts` - Sample period [s]
    /// * `gains` - Gains and shaping parameters
    /// * `sat` - Output (and integral) saturation as (lo, hi)
    pub fn new(ts: f64, gains: PidGains, sat: (f64, f64)) -> Self {
        Self {
            gains,
            ts,
            sat,
            integral: Integrator::new(ts, Vector1::new(0.0)).with_limits(sat.0, sat.1),
            d_state: 0.0,
            ed_old: 0.0,
        }
    }

    /// Advance one sample and return the saturated control output.
    pub fn compute(&mut self, reference: f64, feedback: f64) -> f64 {
        let g = &self.gains;
        let ep = g.wp * reference - feedback;
        let ei = g.wi * reference - feedback;
        let ed = g.wd * reference - feedback;

        let p = g.kp * ep;
        let d = if g.kd != 0.0 {
            // filter time constant (Kd/Kp)/N, falling back to Kd/N for
            // proportional-free configurations
            let tf = if g.kp.abs() > f64::EPSILON {
                (g.kd / (g.kp * g.n)).abs()
            } else {
                (g.kd / g.n).abs()
            };
            (self.d_state * tf + g.kd * (ed - self.ed_old)) / (tf + self.ts)
        } else {
            0.0
        };
        let i = self.integral.value()[0];

        let u = p + i + d;
        let u_sat = u.clamp(self.sat.0, self.sat.1);

        self.integral
            .integrate(&Vector1::new(g.ki * ei + (u_sat - u) / g.tt));
        self.d_state = d;
        self.ed_old = ed;

        u_sat
    }

    /// Reset the internal state; `u0` seeds the integral term.
    pub fn reset(&mut self, u0: f64) {
        self.integral.reset(Vector1::new(u0));
        self.d_state = 0.0;
        self.ed_old = 0.0;
    }

    pub fn gains(&self) -> &PidGains {
        &self.gains
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn p_only(kp: f64) -> ParallelPid {
        let gains = PidGains::pid(kp, 0.0, 0.0);
        ParallelPid::new(0.01, gains, (-1e3, 1e3))
    }

    #[test]
    fn test_proportional_action() {
        let mut pid = p_only(10.0);
        assert_relative_eq!(pid.compute(1.0, 0.0), 10.0);
        // stateless without I and D
        assert_relative_eq!(pid.compute(1.0, 0.0), 10.0);
        assert_relative_eq!(pid.compute(1.0, 0.5), 5.0);
    }

    #[test]
    fn test_integral_ramps() {
        let gains = PidGains::pid(0.0, 2.0, 0.0);
        let mut pid = ParallelPid::new(0.1, gains, (-1e3, 1e3));
        let mut u = 0.0;
        for _ in 0..6 {
            u = pid.compute(1.0, 0.0);
        }
        // integral lags the output by one sample
        assert_relative_eq!(u, 2.0 * 0.1 * 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_output_saturates() {
        let mut pid = p_only(100.0);
        pid.sat = (-5.0, 5.0);
        assert_relative_eq!(pid.compute(1.0, 0.0), 5.0);
        assert_relative_eq!(pid.compute(-1.0, 0.0), -5.0);
    }

    #[test]
    fn test_anti_windup_bounds_integral() {
        let gains = PidGains::pid(1.0, 50.0, 0.0);
        let mut pid = ParallelPid::new(0.01, gains, (-2.0, 2.0));
        for _ in 0..1000 {
            pid.compute(10.0, 0.0);
        }
        assert!(pid.integral.value()[0] <= 2.0 + 1e-9);
        // once the error reverses the output must leave the rail quickly
        let mut u = 0.0;
        for _ in 0..50 {
            u = pid.compute(-10.0, 0.0);
        }
        assert!(u < 0.0);
    }

    #[test]
    fn test_derivative_responds_to_error_rate() {
        let gains = PidGains::pid(0.0, 0.0, 1.0);
        let mut pid = ParallelPid::new(0.01, gains, (-1e3, 1e3));
        let quiet = pid.compute(0.0, 0.0);
        let kick = pid.compute(1.0, 0.0);
        assert_relative_eq!(quiet, 0.0);
        assert!(kick > 0.0);
        // constant error: derivative decays back toward zero
        let mut u = kick;
        for _ in 0..200 {
            u = pid.compute(1.0, 0.0);
        }
        assert!(u.abs() < kick * 0.05);
    }

    #[test]
    fn test_reset_clears_state() {
        let gains = PidGains::pid(1.0, 10.0, 1.0);
        let mut pid = ParallelPid::new(0.01, gains, (-1e3, 1e3));
        for _ in 0..10 {
            pid.compute(1.0, 0.0);
        }
        pid.reset(0.0);
        assert_relative_eq!(pid.integral.value()[0], 0.0);
        assert_relative_eq!(pid.compute(0.0, 0.0), 0.0);
    }
}
