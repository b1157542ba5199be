//! Mathematical utilities
//!
//! Implements the numerical differentiation and integration blocks the
//! estimators are built on.

pub mod differentiator;
pub mod integrator;

pub use differentiator::*;
pub use integrator::*;
