//! Mode-orchestrated identification and validation
//!
//! [`CompensatorDesigner`] owns one periodic task at a time. Depending on
//! the started stage the tick excites the joint with a bang-bang voltage
//! sweep and feeds the plant EKF, rolls the linear predictor forward,
//! polls the stiction estimator, or alternates position set-points under
//! the freshly written controller gains. Every tick publishes one
//! fixed-width telemetry frame; public queries snapshot the same state
//! under the tick mutex.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{error, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{quantized_period, ConfigError, DesignConfig};
use crate::control::{tune, Compensator, TuningError, TuningInput};
use crate::driver::{voltage_polarity, DriverError, JointDriver};
use crate::estimation::{PlantEkf, PositionPredictor, StictionEstimator, StictionError};
use crate::sync::Event;
use crate::telemetry::{Stage, TelemetryFrame, TelemetryPort};
use crate::{Vec2, Vec4};

/// Orchestration failures.
#[derive(Debug, Error)]
pub enum DesignError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error("a stage is already running")]
    AlreadyRunning,
    #[error("no stage has been started")]
    NotStarted,
    #[error("stiction estimation is not configured")]
    StictionNotConfigured,
}

impl From<StictionError> for DesignError {
    fn from(err: StictionError) -> Self {
        match err {
            StictionError::Config(e) => DesignError::Config(e),
            StictionError::Driver(e) => DesignError::Driver(e),
            StictionError::AlreadyRunning => DesignError::AlreadyRunning,
        }
    }
}

/// Reference shape for controller validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RefType {
    /// Step the position-loop reference directly.
    Square,
    /// Profiled `position_move` between the set-points.
    MinJerk,
}

/// Options for [`CompensatorDesigner::start_plant_estimation`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PlantEstimationOptions {
    /// Stage cut-off [s]; 0 runs until stopped
    pub max_time: f64,
}

/// Options for [`CompensatorDesigner::start_plant_validation`].
#[derive(Debug, Clone, Copy)]
pub struct PlantValidationOptions {
    /// Identified time constant [s]
    pub tau: f64,
    /// Identified DC gain
    pub k: f64,
    /// Stage cut-off [s]; 0 runs until stopped
    pub max_time: f64,
    /// Encoder correction cadence [ticks]; 0 disables corrections
    pub measure_update_ticks: usize,
    /// Predictor process noise scale
    pub q: f64,
    /// Predictor measurement noise variance
    pub r: f64,
    /// Predictor covariance scale; defaults to the configured P0
    pub p0: Option<f64>,
}

impl PlantValidationOptions {
    pub fn new(tau: f64, k: f64) -> Self {
        Self {
            tau,
            k,
            max_time: 0.0,
            measure_update_ticks: 100,
            q: 1.0,
            r: 1.0,
            p0: None,
        }
    }
}

/// Options for [`CompensatorDesigner::start_stiction_estimation`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StictionEstimationOptions {
    /// Stage cut-off [s]; 0 runs until convergence or stop
    pub max_time: f64,
}

/// Options for [`CompensatorDesigner::start_controller_validation`].
#[derive(Debug, Clone, Copy)]
pub struct ControllerValidationOptions {
    /// Proportional gain to validate; its sign is matched to the driver
    pub kp: f64,
    /// Identified (rising, falling) stiction offsets to write [V]
    pub stiction: Option<[f64; 2]>,
    /// Reference shape
    pub ref_type: RefType,
    /// Set-point alternation period [s]
    pub ref_period: f64,
    /// Stage cut-off [s]; 0 runs until stopped
    pub max_time: f64,
}

impl ControllerValidationOptions {
    pub fn new(kp: f64) -> Self {
        Self {
            kp,
            stiction: None,
            ref_type: RefType::Square,
            ref_period: 2.0,
            max_time: 0.0,
        }
    }
}

/// Per-stage results snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DesignResults {
    PlantEstimation {
        tau: f64,
        k: f64,
        tau_mean: f64,
        k_mean: f64,
    },
    PlantValidation {
        position: f64,
        velocity: f64,
    },
    StictionEstimation {
        stiction: [f64; 2],
    },
    ControllerValidation {
        voltage: f64,
        position: f64,
        reference: f64,
    },
}

/// Active stage and its scratch state.
enum Mode {
    Idle,
    PlantEstimation {
        /// Running mean of (tau, K)
        mean: Vec2,
        mean_cnt: usize,
    },
    PlantValidation {
        predictor: PositionPredictor,
        update_ticks: usize,
        update_cnt: usize,
    },
    StictionEstimation,
    ControllerValidation {
        ref_square: bool,
        ref_period: f64,
        /// Virtual time of the last set-point flip [s]
        t1: f64,
    },
}

impl Mode {
    fn stage(&self) -> Option<Stage> {
        match self {
            Mode::Idle => None,
            Mode::PlantEstimation { .. } => Some(Stage::PlantEstimation),
            Mode::PlantValidation { .. } => Some(Stage::PlantValidation),
            Mode::StictionEstimation => Some(Stage::StictionEstimation),
            Mode::ControllerValidation { .. } => Some(Stage::ControllerValidation),
        }
    }
}

/// Incremental running mean: m <- m + (x - m) / n with n counting from 1.
fn update_running_mean(mean: &mut Vec2, cnt: &mut usize, sample: Vec2) {
    *cnt += 1;
    *mean += (sample - *mean) / *cnt as f64;
}

/// Everything the periodic tick mutates, guarded by one mutex.
struct DesignerCore {
    joint: usize,
    /// Quantized sample period [s]
    ts: f64,
    dpos_dv: f64,
    x_min: f64,
    x_max: f64,
    max_pwm: f64,
    p0: f64,
    /// Configured EKF prior as (p, v, tau, K)
    prior: Vec4,
    plant: PlantEkf,
    mode: Mode,
    x_tg: f64,
    pwm_pos: bool,
    max_time: f64,
    port: TelemetryPort,
}

impl DesignerCore {
    /// Bang-bang excitation: full voltage toward the current sweep target,
    /// direction flipping when the encoder crosses the inset bound. The
    /// bounds act as switch triggers, overshoot past them is expected.
    fn command_joint(&mut self, drv: &dyn JointDriver) -> Result<(f64, f64), DriverError> {
        let enc = drv.encoder(self.joint)?;

        if self.x_tg == self.x_max {
            if enc > self.x_max {
                self.x_tg = self.x_min;
                self.pwm_pos = false;
            }
        } else if enc < self.x_min {
            self.x_tg = self.x_max;
            self.pwm_pos = true;
        }

        let u = if self.pwm_pos {
            self.max_pwm
        } else {
            -self.max_pwm
        };
        drv.set_offset(self.joint, self.dpos_dv * u)?;

        Ok((enc, u))
    }

    fn tick(
        &mut self,
        drv: &dyn JointDriver,
        stiction: Option<&StictionEstimator>,
        now: f64,
    ) -> Result<(), DriverError> {
        match self.mode.stage() {
            None => {}

            Some(Stage::PlantEstimation) => {
                let (enc, u) = self.command_joint(drv)?;
                let est = self.plant.estimate(u, enc);
                let x = self.plant.internal_state();

                let mut frame = [u, enc, x[0], x[1], x[2], x[3], 0.0, 0.0];
                if let Mode::PlantEstimation { mean, mean_cnt } = &mut self.mode {
                    update_running_mean(mean, mean_cnt, Vec2::new(est.tau, est.k));
                    frame[6] = mean[0];
                    frame[7] = mean[1];
                }
                self.port
                    .publish(TelemetryFrame::padded(Stage::PlantEstimation, &frame));
            }

            Some(Stage::PlantValidation) => {
                let (enc, u) = self.command_joint(drv)?;
                let mut state = Vec2::zeros();
                if let Mode::PlantValidation {
                    predictor,
                    update_ticks,
                    update_cnt,
                } = &mut self.mode
                {
                    state = predictor.predict(u);
                    if *update_ticks > 0 {
                        *update_cnt += 1;
                        if *update_cnt >= *update_ticks {
                            state = predictor.correct(enc);
                            *update_cnt = 0;
                        }
                    }
                }
                self.port.publish(TelemetryFrame::padded(
                    Stage::PlantValidation,
                    &[u, enc, state[0], state[1]],
                ));
            }

            Some(Stage::StictionEstimation) => {
                if let Some(est) = stiction {
                    let info = est.info();
                    let s = est.results();
                    self.port.publish(TelemetryFrame::padded(
                        Stage::StictionEstimation,
                        &[info.voltage, info.position, info.reference, s[0], s[1]],
                    ));
                }
            }

            Some(Stage::ControllerValidation) => {
                if let Mode::ControllerValidation {
                    ref_square,
                    ref_period,
                    t1,
                } = &mut self.mode
                {
                    if now - *t1 > *ref_period {
                        self.x_tg = if self.x_tg == self.x_max {
                            self.x_min
                        } else {
                            self.x_max
                        };
                        *t1 = now;
                        if *ref_square {
                            drv.set_reference(self.joint, self.x_tg)?;
                        } else {
                            drv.position_move(self.joint, self.x_tg)?;
                        }
                    }
                }
                let voltage = drv.output(self.joint)?;
                let enc = drv.encoder(self.joint)?;
                let reference = drv.reference(self.joint)?;
                self.port.publish(TelemetryFrame::padded(
                    Stage::ControllerValidation,
                    &[voltage, enc, reference],
                ));
            }
        }

        Ok(())
    }
}

struct DesignerShared {
    core: Mutex<DesignerCore>,
    done_event: Event,
    stop: AtomicBool,
    running: AtomicBool,
}

/// Orchestrator of the identification and validation stages for one joint.
pub struct CompensatorDesigner {
    driver: Arc<dyn JointDriver>,
    joint: usize,
    period: Duration,
    shared: Arc<DesignerShared>,
    stiction: Option<Arc<StictionEstimator>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CompensatorDesigner {
    /// Bind to the joint named by `cfg`, reading its polarity and limits
    /// and priming the plant EKF with the configured prior.
    pub fn new(driver: Arc<dyn JointDriver>, cfg: &DesignConfig) -> Result<Self, DesignError> {
        let joint = cfg.general.joint;
        let plant_cfg = cfg.plant_estimation.clone().validated()?;
        let ts = quantized_period(plant_cfg.ts)?;

        let pid_info = driver.pid(joint)?;
        let dpos_dv = voltage_polarity(&pid_info);

        let (min_hw, max_hw) = driver.limits(joint)?;
        let range = max_hw - min_hw;
        let x_min = min_hw + 0.1 * range;
        let x_max = max_hw - 0.1 * range;

        let prior = Vec4::new(0.0, 0.0, plant_cfg.tau, plant_cfg.k);
        let plant = PlantEkf::new(ts, plant_cfg.q, plant_cfg.r, plant_cfg.p0, prior)?;

        let stiction = match &cfg.plant_stiction {
            Some(scfg) => Some(Arc::new(StictionEstimator::new(
                Arc::clone(&driver),
                joint,
                scfg,
            )?)),
            None => None,
        };

        let core = DesignerCore {
            joint,
            ts,
            dpos_dv,
            x_min,
            x_max,
            max_pwm: plant_cfg.max_pwm,
            p0: plant_cfg.p0,
            prior,
            plant,
            mode: Mode::Idle,
            x_tg: 0.0,
            pwm_pos: true,
            max_time: 0.0,
            port: TelemetryPort::new(),
        };

        Ok(Self {
            driver,
            joint,
            period: Duration::from_secs_f64(ts),
            shared: Arc::new(DesignerShared {
                core: Mutex::new(core),
                done_event: Event::new(),
                stop: AtomicBool::new(false),
                running: AtomicBool::new(false),
            }),
            stiction,
            handle: Mutex::new(None),
        })
    }

    /// Attach a telemetry subscriber; frames flow only while one is attached.
    pub fn open_telemetry(&self) -> crossbeam_channel::Receiver<TelemetryFrame> {
        self.shared.core.lock().unwrap().port.open()
    }

    /// Closed-form P/PD gain synthesis from an identified (tau, K).
    pub fn tune_controller(input: &TuningInput) -> Result<Compensator, TuningError> {
        tune(input)
    }

    /// Identify (tau, K) under open-loop bang-bang excitation.
    pub fn start_plant_estimation(
        &self,
        opts: &PlantEstimationOptions,
    ) -> Result<(), DesignError> {
        self.ensure_idle()?;
        {
            let mut core = self.shared.core.lock().unwrap();
            self.driver.set_open_loop_mode(self.joint)?;
            let enc = self.driver.encoder(self.joint)?;

            let mut prior = core.prior;
            prior[0] = enc;
            prior[1] = 0.0;
            let p0 = core.p0;
            core.plant.reinit(p0, prior)?;

            core.mode = Mode::PlantEstimation {
                mean: Vec2::zeros(),
                mean_cnt: 0,
            };
            core.x_tg = core.x_max;
            core.pwm_pos = true;
            core.max_time = opts.max_time.max(0.0);
        }
        self.spawn("plant estimation");
        Ok(())
    }

    /// Roll a linear predictor built from (tau, K) against the real joint,
    /// correcting with the encoder only every `measure_update_ticks`.
    pub fn start_plant_validation(
        &self,
        opts: &PlantValidationOptions,
    ) -> Result<(), DesignError> {
        self.ensure_idle()?;
        {
            let mut core = self.shared.core.lock().unwrap();
            let p0 = opts.p0.unwrap_or(core.p0);
            let mut predictor =
                PositionPredictor::new(opts.tau, opts.k, core.ts, opts.q, opts.r, p0)?;

            self.driver.set_open_loop_mode(self.joint)?;
            let enc = self.driver.encoder(self.joint)?;
            predictor.init(Vec2::new(enc, 0.0));

            core.mode = Mode::PlantValidation {
                predictor,
                update_ticks: opts.measure_update_ticks,
                update_cnt: 0,
            };
            core.x_tg = core.x_max;
            core.pwm_pos = true;
            core.max_time = opts.max_time.max(0.0);
        }
        self.spawn("plant validation");
        Ok(())
    }

    /// Run the stiction estimator's own periodic task, polling completion.
    pub fn start_stiction_estimation(
        &self,
        opts: &StictionEstimationOptions,
    ) -> Result<(), DesignError> {
        self.ensure_idle()?;
        let est = self
            .stiction
            .as_ref()
            .ok_or(DesignError::StictionNotConfigured)?;
        est.start()?;
        {
            let mut core = self.shared.core.lock().unwrap();
            core.mode = Mode::StictionEstimation;
            core.max_time = opts.max_time.max(0.0);
        }
        self.spawn("stiction estimation");
        Ok(())
    }

    /// Write the candidate gains into the joint PID and alternate position
    /// set-points between the inset bounds.
    pub fn start_controller_validation(
        &self,
        opts: &ControllerValidationOptions,
    ) -> Result<(), DesignError> {
        self.ensure_idle()?;
        {
            let mut core = self.shared.core.lock().unwrap();

            let pid_old = self.driver.pid(self.joint)?;
            let mut pid_new = pid_old;
            // match the board's stored polarity
            pid_new.kp = if opts.kp * pid_old.kp > 0.0 {
                opts.kp
            } else {
                -opts.kp
            };
            if let Some([up, down]) = opts.stiction {
                pid_new.stiction_up = up;
                pid_new.stiction_down = down;
            }
            self.driver.set_pid(self.joint, &pid_new)?;

            self.driver.set_position_mode(self.joint)?;
            core.x_tg = core.x_max;
            let ref_square = opts.ref_type == RefType::Square;
            if ref_square {
                self.driver.set_reference(self.joint, core.x_tg)?;
            } else {
                self.driver.set_ref_acceleration(self.joint, 1e9)?;
                self.driver
                    .set_ref_speed(self.joint, (core.x_max - core.x_min) / opts.ref_period)?;
                self.driver.position_move(self.joint, core.x_tg)?;
            }

            core.mode = Mode::ControllerValidation {
                ref_square,
                ref_period: opts.ref_period,
                t1: 0.0,
            };
            core.max_time = opts.max_time.max(0.0);
        }
        self.spawn("controller validation");
        Ok(())
    }

    /// Cooperatively stop the running stage and wait for the joint to be
    /// restored.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Whether the started stage has finished.
    pub fn is_done(&self) -> bool {
        !self.shared.running.load(Ordering::SeqCst)
    }

    /// Block until the running stage finishes; returns [`is_done`](Self::is_done).
    pub fn wait_until_done(&self) -> bool {
        self.shared.done_event.wait();
        self.is_done()
    }

    /// Snapshot of the active stage's results.
    pub fn results(&self) -> Result<DesignResults, DesignError> {
        let core = self.shared.core.lock().unwrap();
        match &core.mode {
            Mode::Idle => Err(DesignError::NotStarted),

            Mode::PlantEstimation { mean, .. } => {
                let (tau, k) = core.plant.parameters();
                Ok(DesignResults::PlantEstimation {
                    tau,
                    k,
                    tau_mean: mean[0],
                    k_mean: mean[1],
                })
            }

            Mode::PlantValidation { predictor, .. } => Ok(DesignResults::PlantValidation {
                position: predictor.position(),
                velocity: predictor.velocity(),
            }),

            Mode::StictionEstimation => {
                let est = self
                    .stiction
                    .as_ref()
                    .ok_or(DesignError::StictionNotConfigured)?;
                let s = est.results();
                Ok(DesignResults::StictionEstimation {
                    stiction: [s[0], s[1]],
                })
            }

            Mode::ControllerValidation { .. } => Ok(DesignResults::ControllerValidation {
                voltage: self.driver.output(self.joint)?,
                position: self.driver.encoder(self.joint)?,
                reference: self.driver.reference(self.joint)?,
            }),
        }
    }

    fn ensure_idle(&self) -> Result<(), DesignError> {
        if self.shared.running.load(Ordering::SeqCst) {
            return Err(DesignError::AlreadyRunning);
        }
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
        Ok(())
    }

    fn spawn(&self, stage: &'static str) {
        self.shared.done_event.reset();
        self.shared.stop.store(false, Ordering::SeqCst);
        self.shared.running.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let driver = Arc::clone(&self.driver);
        let stiction = self.stiction.clone();
        let period = self.period;
        let joint = self.joint;

        let handle = std::thread::spawn(move || {
            info!("{stage} started");
            let ts = shared.core.lock().unwrap().ts;
            let mut n: u64 = 0;
            loop {
                if shared.stop.load(Ordering::SeqCst) {
                    break;
                }
                n += 1;
                let now = n as f64 * ts;

                {
                    let mut core = shared.core.lock().unwrap();
                    if core.max_time > 0.0 && now > core.max_time {
                        break;
                    }
                    if let Err(err) = core.tick(driver.as_ref(), stiction.as_deref(), now) {
                        error!("{stage} aborted: {err}");
                        break;
                    }
                }

                if let Some(est) = &stiction {
                    if matches!(
                        shared.core.lock().unwrap().mode,
                        Mode::StictionEstimation
                    ) && est.is_done()
                    {
                        break;
                    }
                }

                spin_sleep::sleep(period);
            }

            // restore the joint per stage
            let stage_kind = shared.core.lock().unwrap().mode.stage();
            match stage_kind {
                Some(Stage::PlantEstimation) | Some(Stage::PlantValidation) => {
                    let _ = driver.set_offset(joint, 0.0);
                    let _ = driver.set_position_mode(joint);
                }
                Some(Stage::StictionEstimation) => {
                    if let Some(est) = &stiction {
                        est.stop();
                    }
                }
                Some(Stage::ControllerValidation) => {
                    let _ = driver.stop(joint);
                }
                None => {}
            }

            shared.running.store(false, Ordering::SeqCst);
            shared.done_event.signal();
            info!("{stage} finished");
        });
        *self.handle.lock().unwrap() = Some(handle);
    }
}

impl Drop for CompensatorDesigner {
    fn drop(&mut self) {
        self.stop();
    }
}
