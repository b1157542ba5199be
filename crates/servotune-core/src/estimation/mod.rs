//! Joint identification estimators
//!
//! - plant EKF: joint state + (tau, K) parameter identification
//! - position predictor: linear Kalman rollout for model validation
//! - stiction estimator: directional breakaway-friction identification

pub mod plant;
pub mod predictor;
pub mod stiction;

pub use plant::*;
pub use predictor::*;
pub use stiction::*;
