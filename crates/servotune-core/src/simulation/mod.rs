//! Simulated joint
//!
//! A software joint implementing the full driver surface: the linear plant,
//! directional breakaway friction, encoder noise and an internal position
//! loop. Used by the test suite and for offline experiments with the
//! identification stages.

pub mod joint;
pub mod noise;

pub use joint::*;
pub use noise::*;
