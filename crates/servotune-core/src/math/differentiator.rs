//! Adaptive-window polynomial differentiation
//!
//! Estimates velocity (first derivative) and acceleration (second
//! derivative) of a sampled signal by least-squares polynomial fitting over
//! a window that adapts to the signal: the window grows while the fit
//! residuals stay within a threshold and shrinks across transients, trading
//! noise rejection against tracking delay.

use std::collections::VecDeque;

use nalgebra::{Matrix2, Matrix3, Vector2, Vector3};

/// Least-squares polynomial differentiator with residual-driven window
/// adaptation.
#[derive(Debug, Clone)]
pub struct AdaptiveWindowDifferentiator {
    /// Polynomial order: 1 estimates velocity, 2 estimates acceleration.
    order: usize,
    /// Maximum window length [samples]
    capacity: usize,
    /// Residual threshold [signal units]
    threshold: f64,
    /// Current window length [samples]
    win_len: usize,
    /// Sample buffer, newest at the back
    samples: VecDeque<(f64, f64)>,
}

impl AdaptiveWindowDifferentiator {
    /// First-derivative estimator (linear fit).
    pub fn velocity(capacity: usize, threshold: f64) -> Self {
        Self::new(1, capacity, threshold)
    }

    /// Second-derivative estimator (quadratic fit).
    pub fn acceleration(capacity: usize, threshold: f64) -> Self {
        Self::new(2, capacity, threshold)
    }

    fn new(order: usize, capacity: usize, threshold: f64) -> Self {
        assert!(order == 1 || order == 2);
        let capacity = capacity.max(order + 2);
        Self {
            order,
            capacity,
            threshold: threshold.abs(),
            win_len: order + 2,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    fn min_len(&self) -> usize {
        self.order + 2
    }

    /// Feed one (time, value) sample and return the derivative estimate at
    /// the newest sample. Returns 0 until the buffer holds enough samples
    /// for an overdetermined fit.
    pub fn estimate(&mut self, t: f64, y: f64) -> f64 {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back((t, y));

        if self.samples.len() < self.min_len() {
            return 0.0;
        }

        // grow back one sample per step, shrink while the fit misses
        self.win_len = (self.win_len + 1).clamp(self.min_len(), self.samples.len());
        loop {
            let (deriv, residual) = self.fit(self.win_len);
            if residual <= self.threshold || self.win_len == self.min_len() {
                return deriv;
            }
            self.win_len -= 1;
        }
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.win_len = self.min_len();
    }

    /// Fit the last `n` samples and return (derivative at the newest sample,
    /// max |residual|). Abscissas are taken relative to the newest time so
    /// the fitted c1 (and 2*c2) are the derivatives at that sample.
    fn fit(&self, n: usize) -> (f64, f64) {
        let len = self.samples.len();
        let t_last = self.samples[len - 1].0;
        let window = self.samples.iter().skip(len - n);

        match self.order {
            1 => {
                let mut xtx = Matrix2::<f64>::zeros();
                let mut xty = Vector2::<f64>::zeros();
                for &(t, y) in window.clone() {
                    let x = t - t_last;
                    xtx[(0, 0)] += 1.0;
                    xtx[(0, 1)] += x;
                    xtx[(1, 1)] += x * x;
                    xty[0] += y;
                    xty[1] += x * y;
                }
                xtx[(1, 0)] = xtx[(0, 1)];
                let c = match xtx.try_inverse() {
                    Some(inv) => inv * xty,
                    None => return (0.0, f64::INFINITY),
                };
                let residual = window
                    .map(|&(t, y)| {
                        let x = t - t_last;
                        (y - (c[0] + c[1] * x)).abs()
                    })
                    .fold(0.0, f64::max);
                (c[1], residual)
            }
            _ => {
                let mut xtx = Matrix3::<f64>::zeros();
                let mut xty = Vector3::<f64>::zeros();
                for &(t, y) in window.clone() {
                    let x = t - t_last;
                    let x2 = x * x;
                    xtx[(0, 0)] += 1.0;
                    xtx[(0, 1)] += x;
                    xtx[(0, 2)] += x2;
                    xtx[(1, 2)] += x * x2;
                    xtx[(2, 2)] += x2 * x2;
                    xty[0] += y;
                    xty[1] += x * y;
                    xty[2] += x2 * y;
                }
                xtx[(1, 0)] = xtx[(0, 1)];
                xtx[(1, 1)] = xtx[(0, 2)];
                xtx[(2, 0)] = xtx[(0, 2)];
                xtx[(2, 1)] = xtx[(1, 2)];
                let c = match xtx.try_inverse() {
                    Some(inv) => inv * xty,
                    None => return (0.0, f64::INFINITY),
                };
                let residual = window
                    .map(|&(t, y)| {
                        let x = t - t_last;
                        (y - (c[0] + c[1] * x + c[2] * x * x)).abs()
                    })
                    .fold(0.0, f64::max);
                (2.0 * c[2], residual)
            }
        }
    }
}
