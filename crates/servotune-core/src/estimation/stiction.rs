//! Adaptive stiction estimator
//!
//! Identifies the two directional breakaway (stiction) voltage offsets of a
//! joint. The joint is driven open-loop around a minimum-jerk sweep between
//! the safety-inset limits by an inner parallel PID plus a direction-
//! dependent feed-forward. While the joint moves slowly and the adaptation
//! latch holds, the position error is integrated; at the end of each
//! low-velocity interval the mean error updates the active feed-forward by
//! gradient descent, or marks that direction as converged when the mean
//! error is already small. Both directions converged means done.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, error, info};
use thiserror::Error;

use crate::config::{quantized_period, ConfigError, StictionConfig};
use crate::control::{MinJerkGenerator, ParallelPid, PidGains};
use crate::driver::{voltage_polarity, DriverError, JointDriver};
use crate::math::{AdaptiveWindowDifferentiator, Integrator};
use crate::sync::Event;
use crate::Vec2;

/// Differentiator window for the velocity/acceleration estimates.
const DIFF_WINDOW: usize = 32;
/// Differentiator residual threshold [deg].
const DIFF_THRESHOLD: f64 = 4.0;

/// Stiction-estimation failures.
#[derive(Debug, Error)]
pub enum StictionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error("estimation already running")]
    AlreadyRunning,
}

/// Direction the reference is currently sweeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Rising,
    Falling,
}

impl Direction {
    fn index(self) -> usize {
        match self {
            Direction::Rising => 0,
            Direction::Falling => 1,
        }
    }
}

/// Per-tick snapshot for telemetry consumers.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StictionInfo {
    /// Commanded voltage (feed-forward + PID) [V]
    pub voltage: f64,
    /// Measured position [deg]
    pub position: f64,
    /// Reference position [deg]
    pub reference: f64,
}

/// Everything the periodic tick mutates, guarded by one mutex.
struct StictionCore {
    joint: usize,
    cfg: StictionConfig,
    /// Quantized sample period [s]
    ts: f64,
    dpos_dv: f64,
    x_min: f64,
    x_max: f64,
    tg: f64,
    xd_pos: f64,
    x_pos: f64,
    x_vel: f64,
    x_acc: f64,
    direction: Direction,
    adapt: bool,
    adapt_old: bool,
    /// Virtual-time anchor of the current half-cycle [s]
    t0: f64,
    stiction: Vec2,
    gamma: Vec2,
    done: Vec2,
    traj: MinJerkGenerator,
    pid: ParallelPid,
    vel_est: AdaptiveWindowDifferentiator,
    acc_est: AdaptiveWindowDifferentiator,
    int_err: Integrator<2>,
    info: StictionInfo,
}

impl StictionCore {
    fn new(joint: usize, cfg: StictionConfig) -> Result<Self, ConfigError> {
        let cfg = cfg.validated()?;
        let ts = quantized_period(cfg.ts)?;
        Ok(Self {
            joint,
            ts,
            dpos_dv: 1.0,
            x_min: 0.0,
            x_max: 0.0,
            tg: 0.0,
            xd_pos: 0.0,
            x_pos: 0.0,
            x_vel: 0.0,
            x_acc: 0.0,
            direction: Direction::Falling,
            adapt: false,
            adapt_old: false,
            t0: 0.0,
            stiction: Vec2::new(cfg.stiction[0], cfg.stiction[1]),
            gamma: Vec2::new(cfg.gamma[0], cfg.gamma[1]),
            done: Vec2::zeros(),
            traj: MinJerkGenerator::new(ts, cfg.t),
            pid: ParallelPid::new(ts, PidGains::pid(cfg.kp, cfg.ki, cfg.kd), (-1e3, 1e3)),
            vel_est: AdaptiveWindowDifferentiator::velocity(DIFF_WINDOW, DIFF_THRESHOLD),
            acc_est: AdaptiveWindowDifferentiator::acceleration(DIFF_WINDOW, DIFF_THRESHOLD),
            int_err: Integrator::new(ts, Vec2::zeros()),
            info: StictionInfo::default(),
            cfg,
        })
    }

    /// Capture the driver state and arm the sweep. Runs once per start.
    fn thread_init(&mut self, drv: &dyn JointDriver) -> Result<(), DriverError> {
        let (min_hw, max_hw) = drv.limits(self.joint)?;
        let range = max_hw - min_hw;
        self.x_min = min_hw + 0.1 * range;
        self.x_max = max_hw - 0.1 * range;

        drv.set_open_loop_mode(self.joint)?;
        self.x_pos = drv.encoder(self.joint)?;
        self.x_vel = 0.0;
        self.x_acc = 0.0;
        self.vel_est.reset();
        self.acc_est.reset();

        self.tg = self.x_min;
        self.xd_pos = self.x_pos;
        self.direction = if self.tg - self.x_pos > 0.0 {
            Direction::Rising
        } else {
            Direction::Falling
        };
        self.adapt = false;
        self.adapt_old = false;

        self.traj.set_execution_time(self.cfg.t);
        self.traj.init(self.x_pos);

        let pid_info = drv.pid(self.joint)?;
        self.dpos_dv = voltage_polarity(&pid_info);
        let sat = pid_info.max_int.abs();
        self.pid = ParallelPid::new(
            self.ts,
            PidGains::pid(self.cfg.kp, self.cfg.ki, self.cfg.kd),
            (-sat, sat),
        );
        self.pid.reset(0.0);

        self.int_err.reset(Vec2::zeros());
        self.done = Vec2::zeros();
        self.t0 = 0.0;

        Ok(())
    }

    /// One periodic sample at virtual time `now`. Returns whether both
    /// directions are currently converged.
    fn tick(&mut self, drv: &dyn JointDriver, now: f64) -> Result<bool, DriverError> {
        self.x_pos = drv.encoder(self.joint)?;
        self.x_vel = self.vel_est.estimate(now, self.x_pos);
        self.x_acc = self.acc_est.estimate(now, self.x_pos);

        // flip the sweep target every two execution times; the latch arms
        // only when the joint is quiet at the flip
        let t = now - self.t0;
        if t > 2.0 * self.traj.execution_time() {
            self.tg = if self.tg == self.x_min {
                self.x_max
            } else {
                self.x_min
            };
            self.direction = if self.tg - self.x_pos > 0.0 {
                Direction::Rising
            } else {
                Direction::Falling
            };
            self.adapt = self.x_vel.abs() < self.cfg.vel_thres;
            self.t0 = now;
        }

        self.traj.advance(self.tg);
        self.xd_pos = self.traj.pos();

        let pid_out = self.pid.compute(self.xd_pos, self.x_pos);
        let e_pos = self.xd_pos - self.x_pos;
        let idx = self.direction.index();
        let u = self.stiction[idx] + pid_out;

        let mut gate = Vec2::zeros();
        if self.x_vel.abs() < self.cfg.vel_thres && self.adapt {
            gate[idx] = 1.0;
        } else {
            self.adapt = false;
        }

        let cum_err = self.int_err.integrate(&(gate * e_pos));

        // adaptation happens on the falling edge of the latch; `t` still
        // spans the whole elapsed interval when the edge coincides with a flip
        if !self.adapt && self.adapt_old {
            self.finish_half_cycle(cum_err, t);
        }

        drv.set_offset(self.joint, self.dpos_dv * u)?;
        self.adapt_old = self.adapt;

        self.info = StictionInfo {
            voltage: u,
            position: self.x_pos,
            reference: self.xd_pos,
        };

        Ok(self.is_done())
    }

    /// Gradient update (or convergence mark) from the gated error integral.
    fn finish_half_cycle(&mut self, cum_err: Vec2, t_elapsed: f64) {
        let e_mean = cum_err / t_elapsed;
        let idx = self.direction.index();
        if e_mean.norm() > self.cfg.e_thres {
            self.stiction += self.gamma.component_mul(&e_mean);
            self.done[idx] = 0.0;
            debug!(
                "stiction update dir {} -> ({:.4}, {:.4})",
                idx, self.stiction[0], self.stiction[1]
            );
        } else {
            self.done[idx] = 1.0;
        }
        self.int_err.reset(Vec2::zeros());
    }

    fn is_done(&self) -> bool {
        self.done[0] * self.done[1] != 0.0
    }

    /// Restore the joint. Best effort: release must not mask tick errors.
    fn thread_release(&mut self, drv: &dyn JointDriver) {
        let _ = drv.set_offset(self.joint, 0.0);
        let _ = drv.set_position_mode(self.joint);
    }
}

struct StictionShared {
    core: Mutex<StictionCore>,
    done_event: Event,
    stop: AtomicBool,
    running: AtomicBool,
}

/// Handle to the stiction-estimation periodic task.
///
/// The estimator owns its own thread; the orchestrator only polls
/// [`is_done`](Self::is_done) and republishes [`info`](Self::info) while the
/// task runs. All methods take `&self`, so the handle can be shared behind
/// an `Arc`.
pub struct StictionEstimator {
    driver: Arc<dyn JointDriver>,
    period: Duration,
    shared: Arc<StictionShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl StictionEstimator {
    /// Validate the configuration and bind the estimator to `joint`.
    pub fn new(
        driver: Arc<dyn JointDriver>,
        joint: usize,
        cfg: &StictionConfig,
    ) -> Result<Self, ConfigError> {
        let core = StictionCore::new(joint, cfg.clone())?;
        let period = Duration::from_secs_f64(core.ts);
        Ok(Self {
            driver,
            period,
            shared: Arc::new(StictionShared {
                core: Mutex::new(core),
                done_event: Event::new(),
                stop: AtomicBool::new(false),
                running: AtomicBool::new(false),
            }),
            handle: Mutex::new(None),
        })
    }

    /// Switch the joint to open loop and start the periodic estimation
    /// task. Fails without side effects when the driver rejects the setup.
    pub fn start(&self) -> Result<(), StictionError> {
        if self.shared.running.load(Ordering::SeqCst) {
            return Err(StictionError::AlreadyRunning);
        }
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }

        let ts = {
            let mut core = self.shared.core.lock().unwrap();
            core.thread_init(self.driver.as_ref())?;
            core.ts
        };

        self.shared.done_event.reset();
        self.shared.stop.store(false, Ordering::SeqCst);
        self.shared.running.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let driver = Arc::clone(&self.driver);
        let period = self.period;
        let handle = std::thread::spawn(move || {
            info!("stiction estimation started");
            let mut n: u64 = 0;
            loop {
                if shared.stop.load(Ordering::SeqCst) {
                    break;
                }
                n += 1;
                let now = n as f64 * ts;
                let result = {
                    let mut core = shared.core.lock().unwrap();
                    core.tick(driver.as_ref(), now)
                };
                match result {
                    Ok(true) => shared.done_event.signal(),
                    Ok(false) => {}
                    Err(err) => {
                        error!("stiction estimation aborted: {err}");
                        break;
                    }
                }
                spin_sleep::sleep(period);
            }
            shared
                .core
                .lock()
                .unwrap()
                .thread_release(driver.as_ref());
            shared.running.store(false, Ordering::SeqCst);
            shared.done_event.signal();
            info!("stiction estimation stopped");
        });
        *self.handle.lock().unwrap() = Some(handle);

        Ok(())
    }

    /// Ask the task to stop and wait for the joint to be restored.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Both directional offsets converged.
    pub fn is_done(&self) -> bool {
        self.shared.core.lock().unwrap().is_done()
    }

    /// Block until convergence (or task shutdown); returns [`is_done`](Self::is_done).
    pub fn wait_until_done(&self) -> bool {
        self.shared.done_event.wait();
        self.is_done()
    }

    /// Current (rising, falling) offsets [V].
    pub fn results(&self) -> Vec2 {
        self.shared.core.lock().unwrap().stiction
    }

    /// Snapshot of the last tick for telemetry.
    pub fn info(&self) -> StictionInfo {
        self.shared.core.lock().unwrap().info
    }
}

impl Drop for StictionEstimator {
    fn drop(&mut self) {
        self.stop();
    }
}
