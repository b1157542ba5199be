//! Linear validation predictor
//!
//! Two-state (position, velocity) Kalman filter built from an identified
//! (tau, K) pair. During model validation it predicts open-loop at every
//! sample and is corrected with the encoder only sporadically, so the drift
//! between corrections measures how well the identified model explains the
//! real joint.

use nalgebra::Vector1;

use crate::config::ConfigError;
use crate::{Mat2, Vec2};

/// Linear (p, v) Kalman predictor with decoupled predict/correct.
#[derive(Debug, Clone)]
pub struct PositionPredictor {
    a: Mat2,
    b: Vec2,
    q: Mat2,
    r: f64,
    p0: f64,
    p: Mat2,
    x: Vec2,
}

impl PositionPredictor {
    /// Build the predictor from identified plant parameters.
    ///
    /// # Arguments
    /// * `tau` - Time constant [s], > 0
    /// * `k` - DC gain
    /// * `ts` - Sample period [s]
    /// * `q` - Process noise diagonal scale
    /// * `r` - Measurement noise variance
    /// * `p0` - Covariance scale applied at `init`
    pub fn new(tau: f64, k: f64, ts: f64, q: f64, r: f64, p0: f64) -> Result<Self, ConfigError> {
        if tau <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "tau",
                value: tau,
            });
        }
        if ts <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "ts",
                value: ts,
            });
        }

        // zero-order-hold discretization of p'' + p'/tau = (K/tau) u
        let a_c = 1.0 / tau;
        let b_c = k / tau;
        let exp = (-ts * a_c).exp();
        let exp_1 = 1.0 - exp;

        let mut a = Mat2::identity();
        a[(0, 1)] = exp_1 / a_c;
        a[(1, 1)] = exp;
        let b = Vec2::new(b_c * (a_c * ts - exp_1) / (a_c * a_c), b_c * exp_1 / a_c);

        Ok(Self {
            a,
            b,
            q: Mat2::identity() * q,
            r,
            p0,
            p: Mat2::identity() * p0,
            x: Vec2::zeros(),
        })
    }

    /// Restart the rollout from `x0`, resetting the covariance.
    pub fn init(&mut self, x0: Vec2) {
        self.x = x0;
        self.p = Mat2::identity() * self.p0;
    }

    /// Open-loop prediction with the applied voltage `u`.
    pub fn predict(&mut self, u: f64) -> Vec2 {
        self.x = self.a * self.x + self.b * u;
        self.p = self.a * self.p * self.a.transpose() + self.q;
        self.x
    }

    /// Measurement correction with the encoder reading `y` (H = [1 0]).
    pub fn correct(&mut self, y: f64) -> Vec2 {
        let s = self.p[(0, 0)] + self.r;
        let k = self.p.column(0).into_owned() / s;
        self.x += k * (y - self.x[0]);
        let p_row0 = self.p.row(0).into_owned();
        self.p -= k * p_row0;
        self.x
    }

    pub fn state(&self) -> Vec2 {
        self.x
    }

    pub fn position(&self) -> f64 {
        self.x[0]
    }

    pub fn velocity(&self) -> f64 {
        self.x[1]
    }

    pub fn covariance(&self) -> &Mat2 {
        &self.p
    }

    /// Innovation a correction with `y` would apply, without applying it.
    pub fn innovation(&self, y: f64) -> Vector1<f64> {
        Vector1::new(y - self.x[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_nonpositive_tau_rejected() {
        assert!(PositionPredictor::new(0.0, 1.5, 0.01, 1.0, 1.0, 1e5).is_err());
    }

    #[test]
    fn test_step_response_matches_analytic_solution() {
        // p(t) = K u (t - tau (1 - e^{-t/tau})) for a voltage step from rest
        let (tau, k, ts, u) = (0.3, 1.5, 0.01, 500.0);
        let mut predictor = PositionPredictor::new(tau, k, ts, 1.0, 1.0, 1e5).unwrap();
        predictor.init(Vec2::zeros());

        for _ in 0..100 {
            predictor.predict(u);
        }

        let t = 1.0;
        let p_exact = k * u * (t - tau * (1.0 - (-t / tau).exp()));
        let v_exact = k * u * (1.0 - (-t / tau).exp());
        assert_relative_eq!(predictor.position(), p_exact, max_relative = 1e-9);
        assert_relative_eq!(predictor.velocity(), v_exact, max_relative = 1e-9);
    }

    #[test]
    fn test_correction_pulls_toward_measurement() {
        let mut predictor = PositionPredictor::new(0.3, 1.5, 0.01, 1.0, 1.0, 1e5).unwrap();
        predictor.init(Vec2::zeros());
        predictor.predict(0.0);

        let before = predictor.innovation(25.0)[0];
        predictor.correct(25.0);
        // high covariance: essentially lands on the measurement
        assert!(predictor.innovation(25.0)[0].abs() < before.abs() * 1e-3);
        assert!(predictor.covariance()[(0, 0)] < 1e5);
    }

    #[test]
    fn test_init_resets_state_and_covariance() {
        let mut predictor = PositionPredictor::new(0.3, 1.5, 0.01, 1.0, 1.0, 1e5).unwrap();
        predictor.predict(100.0);
        predictor.correct(3.0);
        predictor.init(Vec2::new(7.0, 0.0));
        assert_relative_eq!(predictor.position(), 7.0);
        assert_relative_eq!(predictor.velocity(), 0.0);
        assert_relative_eq!(predictor.covariance()[(0, 0)], 1e5);
    }
}
