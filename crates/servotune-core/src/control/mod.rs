//! Control blocks
//!
//! Implements the inner-loop parallel PID, the minimum-jerk reference
//! generator used for stiction excitation, and the closed-form P/PD
//! compensator synthesis.

pub mod pid;
pub mod trajectory;
pub mod tuning;

pub use pid::*;
pub use trajectory::*;
pub use tuning::*;
