//! # servotune-core
//!
//! Online identification and compensator design for a single rotational
//! actuator driven through a voltage (PWM) interface.
//!
//! The joint is modeled as a first-order-plus-integrator plant perturbed by
//! directional breakaway friction. While the joint is excited open-loop, an
//! extended Kalman filter identifies the mechanical time constant and DC
//! gain, an adaptive estimator identifies the two directional stiction
//! offsets, and closed-form rules synthesize P/PD position gains from the
//! identified model.
//!
//! ## Modules
//!
//! - [`math`]: adaptive-window differentiation, integration helpers
//! - [`control`]: parallel PID, minimum-jerk reference generation, gain tuning
//! - [`estimation`]: plant EKF, validation predictor, stiction estimator
//! - [`design`]: the mode-orchestrated identification/validation driver
//! - [`driver`]: the joint hardware capability boundary
//! - [`simulation`]: a simulated joint for tests and offline experiments

pub mod config;
pub mod control;
pub mod design;
pub mod driver;
pub mod estimation;
pub mod math;
pub mod simulation;
pub mod sync;
pub mod telemetry;

use nalgebra::{Matrix2, Matrix4, Vector2, Vector4};

/// 2D vector type
pub type Vec2 = Vector2<f64>;

/// 4D vector type
pub type Vec4 = Vector4<f64>;

/// 2x2 matrix type
pub type Mat2 = Matrix2<f64>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f64>;
