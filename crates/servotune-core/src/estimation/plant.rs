//! Plant EKF
//!
//! Joint state and parameter estimation for the voltage-to-position plant
//!
//!   p'' + p'/tau = (K/tau) u.
//!
//! Position, velocity and the two plant parameters are estimated jointly by
//! an extended Kalman filter over the state x = (p, v, 1/tau, K/tau). In
//! this parametrization the zero-order-hold discretization of the plant has
//! a closed form in x3 = 1/tau and x4 = K/tau, and so does the process
//! Jacobian, so no generic linearization machinery is needed.

use log::warn;

use crate::config::ConfigError;
use crate::{Mat4, Vec4};

/// Lower clamp on the estimated 1/tau; keeps the transition well defined
/// through transient negative excursions of the parameter estimate.
const X3_MIN: f64 = 1e-9;

/// Externally reported joint estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlantEstimate {
    /// Position [deg]
    pub position: f64,
    /// Velocity [deg/s]
    pub velocity: f64,
    /// Mechanical time constant [s]
    pub tau: f64,
    /// DC gain [deg/s/V]
    pub k: f64,
}

/// Extended Kalman filter over (p, v, 1/tau, K/tau).
#[derive(Debug, Clone)]
pub struct PlantEkf {
    ts: f64,
    q: Mat4,
    r: f64,
    p: Mat4,
    /// Internal state (p, v, 1/tau, K/tau)
    x: Vec4,
}

impl Default for PlantEkf {
    fn default() -> Self {
        Self::new(0.01, 1.0, 1.0, 1e5, Vec4::new(0.0, 0.0, 1.0, 1.0)).unwrap()
    }
}

impl PlantEkf {
    /// Full initialization.
    ///
    /// # Arguments
    /// * `ts` - Sample period [s]
    /// * `q` - Process noise diagonal scale
    /// * `r` - Measurement noise variance
    /// * `p0` - Initial covariance scale
    /// * `prior` - State prior as (p, v, tau, K); tau must be positive
    pub fn new(ts: f64, q: f64, r: f64, p0: f64, prior: Vec4) -> Result<Self, ConfigError> {
        if ts <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "ts",
                value: ts,
            });
        }
        let mut ekf = Self {
            ts,
            q: Mat4::identity() * q,
            r,
            p: Mat4::identity(),
            x: Vec4::zeros(),
        };
        ekf.reinit(p0, prior)?;
        Ok(ekf)
    }

    /// Warm reset: new prior and covariance, keeping Ts, Q, R.
    ///
    /// `prior` is given as (p, v, tau, K) and folded into the internal
    /// (p, v, 1/tau, K/tau) parametrization.
    pub fn reinit(&mut self, p0: f64, prior: Vec4) -> Result<(), ConfigError> {
        if prior[2] <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "tau",
                value: prior[2],
            });
        }
        self.p = Mat4::identity() * p0;
        self.x = Vec4::new(prior[0], prior[1], 1.0 / prior[2], prior[3] / prior[2]);
        Ok(())
    }

    /// One predict + correct step given the applied voltage `u` and the
    /// encoder measurement `y`. Returns the reported (p, v, tau, K).
    pub fn estimate(&mut self, u: f64, y: f64) -> PlantEstimate {
        if self.x[2] < X3_MIN {
            warn!("1/tau estimate fell to {}; clamping", self.x[2]);
            self.x[2] = X3_MIN;
        }

        let ts = self.ts;
        let x2 = self.x[1];
        let x3 = self.x[2];
        let x4 = self.x[3];

        let exp = (-ts * x3).exp();
        let exp_1 = 1.0 - exp;
        let x3_2 = x3 * x3;
        let tmp_1 = (ts * x3 - exp_1) / x3_2;

        // zero-order-hold transition
        let a01 = exp_1 / x3;
        let b0 = x4 * tmp_1;
        let b1 = x4 * a01;

        // process Jacobian: parameter rows are identity, the (p, v) rows
        // carry the closed-form sensitivities to x3 and x4
        let mut f = Mat4::identity();
        f[(0, 1)] = a01;
        f[(1, 1)] = exp;
        f[(0, 2)] = -(x2 * exp_1) / x3_2 + (u * x4 * ts * exp_1) / x3_2 - 2.0 * u * b0 / x3
            + ts * x2 * exp / x3;
        f[(1, 2)] = -(u * x4 * exp_1) / x3_2 - ts * x2 * exp + u * x4 * ts * exp / x3;
        f[(0, 3)] = u * tmp_1;
        f[(1, 3)] = u * a01;

        // prediction
        let x_pred = Vec4::new(
            self.x[0] + a01 * x2 + b0 * u,
            exp * x2 + b1 * u,
            x3,
            x4,
        );
        self.x = x_pred;
        self.p = f * self.p * f.transpose() + self.q;

        // Kalman gain for the scalar position measurement C = [1 0 0 0]
        let s = self.p[(0, 0)] + self.r;
        let k = self.p.column(0).into_owned() / s;

        // correction
        self.x += k * (y - self.x[0]);
        let p_row0 = self.p.row(0).into_owned();
        self.p -= k * p_row0;

        if self.x[2] < X3_MIN {
            self.x[2] = X3_MIN;
        }

        self.report()
    }

    /// Current reported estimate without advancing the filter.
    pub fn report(&self) -> PlantEstimate {
        PlantEstimate {
            position: self.x[0],
            velocity: self.x[1],
            tau: 1.0 / self.x[2],
            k: self.x[3] / self.x[2],
        }
    }

    /// Internal state (p, v, 1/tau, K/tau).
    pub fn internal_state(&self) -> Vec4 {
        self.x
    }

    /// Identified (tau, K).
    pub fn parameters(&self) -> (f64, f64) {
        (1.0 / self.x[2], self.x[3] / self.x[2])
    }

    pub fn covariance(&self) -> &Mat4 {
        &self.p
    }

    pub fn ts(&self) -> f64 {
        self.ts
    }
}
