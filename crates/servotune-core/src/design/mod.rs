//! Compensator design orchestration
//!
//! Sequences the identification and validation stages over one joint:
//! plant estimation, plant validation, stiction estimation and controller
//! validation, each with its own excitation policy.

pub mod compensator;

pub use compensator::*;
