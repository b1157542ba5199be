//! Numerical integration
//!
//! A generic RK4 step used by the reference generator, and a discrete
//! forward-Euler integrator block with output saturation used by the PID
//! integral term and the stiction error accumulator.

use nalgebra::SVector;

/// Single 4th-order Runge-Kutta step for dx/dt = f(t, x).
///
/// # Arguments
/// * `x` - Current state
/// * `t` - Current time
/// * `dt` - Time step
/// * `f` - Derivative function f(t, x) -> dx/dt
pub fn rk4<const N: usize, F>(x: &SVector<f64, N>, t: f64, dt: f64, f: F) -> SVector<f64, N>
where
    F: Fn(f64, &SVector<f64, N>) -> SVector<f64, N>,
{
    let k1 = f(t, x);
    let k2 = f(t + dt / 2.0, &(x + k1 * dt / 2.0));
    let k3 = f(t + dt / 2.0, &(x + k2 * dt / 2.0));
    let k4 = f(t + dt, &(x + k3 * dt));

    x + (k1 + k2 * 2.0 + k3 * 2.0 + k4) * (dt / 6.0)
}

/// Discrete-time integrator block: y += Ts * u, with optional elementwise
/// output clamping.
#[derive(Debug, Clone)]
pub struct Integrator<const N: usize> {
    ts: f64,
    y: SVector<f64, N>,
    limits: Option<(f64, f64)>,
}

impl<const N: usize> Integrator<N> {
    pub fn new(ts: f64, y0: SVector<f64, N>) -> Self {
        Self {
            ts,
            y: y0,
            limits: None,
        }
    }

    /// Clamp the output to [lo, hi].
    pub fn with_limits(mut self, lo: f64, hi: f64) -> Self {
        self.limits = Some((lo, hi));
        self.saturate();
        self
    }

    pub fn set_ts(&mut self, ts: f64) {
        self.ts = ts;
    }

    /// Advance one sample and return the accumulated value.
    pub fn integrate(&mut self, u: &SVector<f64, N>) -> SVector<f64, N> {
        self.y += u * self.ts;
        self.saturate();
        self.y
    }

    pub fn value(&self) -> SVector<f64, N> {
        self.y
    }

    pub fn reset(&mut self, y0: SVector<f64, N>) {
        self.y = y0;
        self.saturate();
    }

    fn saturate(&mut self) {
        if let Some((lo, hi)) = self.limits {
            for v in self.y.iter_mut() {
                *v = v.clamp(lo, hi);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Vector1, Vector2};

    #[test]
    fn test_rk4_exponential_decay() {
        // dx/dt = -x with x(0) = 1; exact solution e^(-t)
        let mut x = SVector::<f64, 1>::new(1.0);
        let dt = 0.01;
        let mut t = 0.0;
        for _ in 0..100 {
            x = rk4(&x, t, dt, |_t, x| -x);
            t += dt;
        }
        assert_relative_eq!(x[0], (-1.0_f64).exp(), epsilon = 1e-6);
    }

    #[test]
    fn test_integrator_accumulates() {
        let mut int = Integrator::new(0.1, Vector1::new(0.0));
        for _ in 0..10 {
            int.integrate(&Vector1::new(2.0));
        }
        assert_relative_eq!(int.value()[0], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_integrator_saturates() {
        let mut int = Integrator::new(1.0, Vector2::new(0.0, 0.0)).with_limits(-1.0, 1.0);
        let y = int.integrate(&Vector2::new(5.0, -5.0));
        assert_relative_eq!(y[0], 1.0);
        assert_relative_eq!(y[1], -1.0);
    }

    #[test]
    fn test_integrator_reset() {
        let mut int = Integrator::new(0.5, Vector1::new(3.0));
        int.integrate(&Vector1::new(1.0));
        int.reset(Vector1::new(0.0));
        assert_relative_eq!(int.value()[0], 0.0);
    }
}
