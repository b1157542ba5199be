//! Configuration schema
//!
//! Defines the configuration groups consumed by the identification
//! subsystems, with the conventional defaults. The embedding application
//! deserializes these from its own configuration source.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration-level failures. Reported by constructors and start
/// operations; no state changes when one is returned.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("sample period {ts} s rounds to 0 ms")]
    SamplePeriodTooShort { ts: f64 },
    #[error("invalid value {value} for `{field}`")]
    InvalidValue { field: &'static str, value: f64 },
}

/// Round a sample period to the scheduler's millisecond quantum.
///
/// Periods that round to zero are rejected rather than clamped.
pub fn quantize_period_ms(ts: f64) -> Result<u64, ConfigError> {
    let ms = (1000.0 * ts).round();
    if ms < 1.0 || !ms.is_finite() {
        return Err(ConfigError::SamplePeriodTooShort { ts });
    }
    Ok(ms as u64)
}

/// Sample period in seconds after millisecond quantization.
pub fn quantized_period(ts: f64) -> Result<f64, ConfigError> {
    Ok(quantize_period_ms(ts)? as f64 * 1e-3)
}

/// `general` group: which joint to identify and where to publish telemetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Index of the joint under identification
    pub joint: usize,
    /// Optional telemetry port name
    #[serde(default)]
    pub port: Option<String>,
}

/// `plant_estimation` group: EKF priors and excitation level.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlantEstimationConfig {
    /// Sample period [s]
    pub ts: f64,
    /// Process noise (diagonal scale)
    pub q: f64,
    /// Measurement noise variance
    pub r: f64,
    /// Initial covariance scale
    pub p0: f64,
    /// Time-constant prior [s]
    pub tau: f64,
    /// DC-gain prior
    pub k: f64,
    /// Excitation voltage magnitude [V]
    pub max_pwm: f64,
}

impl Default for PlantEstimationConfig {
    fn default() -> Self {
        Self {
            ts: 0.01,
            q: 1.0,
            r: 1.0,
            p0: 1e5,
            tau: 1.0,
            k: 1.0,
            max_pwm: 800.0,
        }
    }
}

impl PlantEstimationConfig {
    /// Normalize and validate the group.
    ///
    /// `max_pwm` is folded to its magnitude (polarity is applied separately
    /// when writing the driver offset); the time-constant prior must be
    /// strictly positive.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        quantize_period_ms(self.ts)?;
        self.max_pwm = self.max_pwm.abs();
        if self.tau <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "tau",
                value: self.tau,
            });
        }
        Ok(self)
    }
}

/// `plant_stiction` group: inner-loop gains and adaptation thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StictionConfig {
    /// Sample period [s]
    pub ts: f64,
    /// Reference half-cycle execution time [s]
    pub t: f64,
    /// Inner-loop proportional gain
    pub kp: f64,
    /// Inner-loop integral gain
    pub ki: f64,
    /// Inner-loop derivative gain
    pub kd: f64,
    /// Velocity gate threshold [deg/s]
    pub vel_thres: f64,
    /// Mean-error threshold closing the adaptation [deg]
    pub e_thres: f64,
    /// Adaptation gains (rising, falling)
    pub gamma: [f64; 2],
    /// Initial offsets (rising, falling) [V]
    pub stiction: [f64; 2],
}

impl Default for StictionConfig {
    fn default() -> Self {
        Self {
            ts: 0.01,
            t: 2.0,
            kp: 10.0,
            ki: 250.0,
            kd: 15.0,
            vel_thres: 5.0,
            e_thres: 1.0,
            gamma: [1e-3, 1e-3],
            stiction: [0.0, 0.0],
        }
    }
}

impl StictionConfig {
    /// Normalize and validate the group: thresholds are folded to their
    /// magnitudes, the periods must be usable.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        quantize_period_ms(self.ts)?;
        self.vel_thres = self.vel_thres.abs();
        self.e_thres = self.e_thres.abs();
        if self.t <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "t",
                value: self.t,
            });
        }
        Ok(self)
    }
}

/// Complete configuration for the compensator-design orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignConfig {
    pub general: GeneralConfig,
    #[serde(default)]
    pub plant_estimation: PlantEstimationConfig,
    /// Optional: without it the stiction-estimation stage is unavailable.
    #[serde(default)]
    pub plant_stiction: Option<StictionConfig>,
}

impl DesignConfig {
    pub fn new(joint: usize) -> Self {
        Self {
            general: GeneralConfig { joint, port: None },
            plant_estimation: PlantEstimationConfig::default(),
            plant_stiction: Some(StictionConfig::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_defaults_match_convention() {
        let plant = PlantEstimationConfig::default();
        assert_relative_eq!(plant.ts, 0.01);
        assert_relative_eq!(plant.p0, 1e5);
        assert_relative_eq!(plant.max_pwm, 800.0);

        let stiction = StictionConfig::default();
        assert_relative_eq!(stiction.t, 2.0);
        assert_relative_eq!(stiction.ki, 250.0);
        assert_relative_eq!(stiction.gamma[0], 1e-3);
    }

    #[test]
    fn test_zero_period_rejected() {
        assert!(matches!(
            quantize_period_ms(0.0),
            Err(ConfigError::SamplePeriodTooShort { .. })
        ));
        // 0.4 ms rounds to zero as well
        assert!(quantize_period_ms(4e-4).is_err());
        assert_eq!(quantize_period_ms(0.01).unwrap(), 10);
    }

    #[test]
    fn test_period_rounds_to_nearest_ms() {
        assert_eq!(quantize_period_ms(0.0126).unwrap(), 13);
        assert_relative_eq!(quantized_period(0.0126).unwrap(), 0.013);
    }

    #[test]
    fn test_negative_magnitudes_normalized() {
        let plant = PlantEstimationConfig {
            max_pwm: -800.0,
            ..Default::default()
        }
        .validated()
        .unwrap();
        assert_relative_eq!(plant.max_pwm, 800.0);

        let stiction = StictionConfig {
            vel_thres: -5.0,
            e_thres: -1.0,
            ..Default::default()
        }
        .validated()
        .unwrap();
        assert_relative_eq!(stiction.vel_thres, 5.0);
        assert_relative_eq!(stiction.e_thres, 1.0);
    }

    #[test]
    fn test_nonpositive_tau_prior_rejected() {
        let plant = PlantEstimationConfig {
            tau: 0.0,
            ..Default::default()
        };
        assert!(plant.validated().is_err());
    }
}
