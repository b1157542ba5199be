//! Closed-form compensator synthesis
//!
//! Computes P or PD position gains for the identified plant
//! P(s) = K / (s (1 + tau s)) by pole placement on the closed-loop
//! natural frequency / damping pair.

use std::f64::consts::PI;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default PD cutoff frequency [Hz] when none is requested.
pub const DEFAULT_PD_F_CUT: f64 = 2.0 * PI * 2.0;

/// Synthesis failures.
#[derive(Debug, Clone, Error)]
pub enum TuningError {
    #[error("unknown compensator type `{0}`")]
    UnknownType(String),
    #[error("P design needs either `f_cut` or `zeta`")]
    Underdetermined,
    #[error("plant (tau={tau}, k={k}) is not tunable")]
    InvalidPlant { tau: f64, k: f64 },
}

/// Requested compensator structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CompensatorKind {
    P,
    Pd,
}

impl FromStr for CompensatorKind {
    type Err = TuningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "P" => Ok(Self::P),
            "PD" => Ok(Self::Pd),
            other => Err(TuningError::UnknownType(other.to_string())),
        }
    }
}

/// Plant parameters plus design degrees of freedom.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningInput {
    /// Identified time constant [s]
    pub tau: f64,
    /// Identified DC gain
    pub k: f64,
    /// Compensator structure
    pub kind: CompensatorKind,
    /// Requested cutoff frequency [Hz]
    pub f_cut: Option<f64>,
    /// Requested closed-loop damping
    pub zeta: Option<f64>,
}

impl TuningInput {
    pub fn new(tau: f64, k: f64, kind: CompensatorKind) -> Self {
        Self {
            tau,
            k,
            kind,
            f_cut: None,
            zeta: None,
        }
    }
}

/// Synthesized gains together with the realized design point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Compensator {
    pub kp: f64,
    pub kd: f64,
    /// Derivative time constant [s] (0 for pure P)
    pub tau_d: f64,
    /// Realized cutoff frequency [Hz]
    pub f_cut: f64,
    /// Realized damping
    pub zeta: f64,
}

/// Closed-form P/PD synthesis.
///
/// For `P`, exactly one of `f_cut` and `zeta` fixes the design: either
/// omega = 2 pi f_cut with zeta = 1/(2 tau omega), or omega = 1/(2 tau zeta).
/// For `PD`, the damping is lifted to max(zeta, 1/(2 tau omega)) so the
/// derivative time constant stays realizable.
pub fn tune(input: &TuningInput) -> Result<Compensator, TuningError> {
    if input.tau <= 0.0 || input.k == 0.0 {
        return Err(TuningError::InvalidPlant {
            tau: input.tau,
            k: input.k,
        });
    }
    let tau = input.tau;
    let k = input.k;

    match input.kind {
        CompensatorKind::P => {
            let (omega, zeta) = if let Some(f_cut) = input.f_cut {
                let omega = 2.0 * PI * f_cut;
                (omega, 1.0 / (2.0 * tau * omega))
            } else if let Some(zeta) = input.zeta {
                (1.0 / (2.0 * tau * zeta), zeta)
            } else {
                return Err(TuningError::Underdetermined);
            };

            Ok(Compensator {
                kp: omega * omega * tau / k,
                kd: 0.0,
                tau_d: 0.0,
                f_cut: omega / (2.0 * PI),
                zeta,
            })
        }
        CompensatorKind::Pd => {
            let omega = 2.0 * PI * input.f_cut.unwrap_or(DEFAULT_PD_F_CUT);
            let zeta = input.zeta.unwrap_or(1.0).max(1.0 / (2.0 * tau * omega));

            let tau_d = 1.0 / (2.0 * zeta * omega);
            Ok(Compensator {
                kp: omega / (2.0 * zeta * k),
                kd: (tau / tau_d - 1.0) / (4.0 * zeta * zeta * k),
                tau_d,
                f_cut: omega / (2.0 * PI),
                zeta,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_p_design_from_cutoff() {
        let mut input = TuningInput::new(0.3, 1.5, CompensatorKind::P);
        input.f_cut = Some(2.0);
        let c = tune(&input).unwrap();

        let omega = 2.0 * PI * 2.0;
        assert_relative_eq!(c.zeta, 1.0 / (2.0 * 0.3 * omega), epsilon = 1e-12);
        assert_relative_eq!(c.kp, omega * omega * 0.3 / 1.5, epsilon = 1e-12);
        assert_relative_eq!(c.kd, 0.0);
        assert_relative_eq!(c.tau_d, 0.0);
        assert_relative_eq!(c.f_cut, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_p_design_cutoff_zeta_duality() {
        let mut by_cutoff = TuningInput::new(0.3, 1.5, CompensatorKind::P);
        by_cutoff.f_cut = Some(2.0);
        let first = tune(&by_cutoff).unwrap();

        let mut by_zeta = TuningInput::new(0.3, 1.5, CompensatorKind::P);
        by_zeta.zeta = Some(first.zeta);
        let second = tune(&by_zeta).unwrap();

        assert_relative_eq!(first.kp, second.kp, epsilon = 1e-9);
        assert_relative_eq!(first.f_cut, second.f_cut, epsilon = 1e-9);
    }

    #[test]
    fn test_pd_design_reference_values() {
        let mut input = TuningInput::new(0.3, 1.5, CompensatorKind::Pd);
        input.f_cut = Some(2.0);
        input.zeta = Some(1.0);
        let c = tune(&input).unwrap();

        let omega = 4.0 * PI;
        assert_relative_eq!(c.zeta, 1.0, epsilon = 1e-12);
        assert_relative_eq!(c.kp, omega / 3.0, epsilon = 1e-9);
        assert_relative_eq!(c.tau_d, 1.0 / (2.0 * omega), epsilon = 1e-9);
        assert_relative_eq!(c.kd, (0.3 / c.tau_d - 1.0) / 6.0, epsilon = 1e-9);
        assert_relative_eq!(c.kp, 4.18879, epsilon = 1e-4);
        assert_relative_eq!(c.tau_d, 0.039789, epsilon = 1e-5);
        assert_relative_eq!(c.kd, 1.089, epsilon = 1e-3);
    }

    #[test]
    fn test_pd_zeta_lift_for_realizability() {
        let mut input = TuningInput::new(0.3, 1.5, CompensatorKind::Pd);
        input.f_cut = Some(0.1);
        input.zeta = Some(0.01);
        let c = tune(&input).unwrap();

        let omega = 2.0 * PI * 0.1;
        assert_relative_eq!(c.zeta, 1.0 / (2.0 * 0.3 * omega), epsilon = 1e-12);
        // at the lift boundary tau_d degenerates to tau and kd vanishes
        assert_relative_eq!(c.tau_d, 0.3, epsilon = 1e-9);
        assert_relative_eq!(c.kd, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_p_design_requires_a_degree_of_freedom() {
        let input = TuningInput::new(0.3, 1.5, CompensatorKind::P);
        assert!(matches!(tune(&input), Err(TuningError::Underdetermined)));
    }

    #[test]
    fn test_invalid_plant_rejected() {
        let mut input = TuningInput::new(-0.3, 1.5, CompensatorKind::P);
        input.f_cut = Some(2.0);
        assert!(matches!(
            tune(&input),
            Err(TuningError::InvalidPlant { .. })
        ));
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("P".parse::<CompensatorKind>().unwrap(), CompensatorKind::P);
        assert_eq!("pd".parse::<CompensatorKind>().unwrap(), CompensatorKind::Pd);
        assert!(matches!(
            "PID".parse::<CompensatorKind>(),
            Err(TuningError::UnknownType(_))
        ));
    }
}
