//! End-to-end identification scenarios
//!
//! Drives the public, threaded API of the orchestrator and the standalone
//! stiction estimator against the simulated joint: stage life cycle,
//! completion ordering, telemetry shape and result snapshots.

use std::sync::Arc;
use std::time::Duration;

use servotune_core::config::{
    DesignConfig, GeneralConfig, PlantEstimationConfig, StictionConfig,
};
use servotune_core::design::{
    CompensatorDesigner, ControllerValidationOptions, DesignError, DesignResults,
    PlantEstimationOptions, PlantValidationOptions, RefType, StictionEstimationOptions,
};
use servotune_core::driver::{ControlMode, JointDriver};
use servotune_core::estimation::StictionEstimator;
use servotune_core::simulation::{SimJointParams, SimulatedJoint};
use servotune_core::telemetry::{Stage, FRAME_WIDTH};

fn sim_joint(params: SimJointParams) -> Arc<SimulatedJoint> {
    Arc::new(SimulatedJoint::new(params).with_real_time())
}

fn config(stiction: StictionConfig) -> DesignConfig {
    DesignConfig {
        general: GeneralConfig {
            joint: 0,
            port: None,
        },
        plant_estimation: PlantEstimationConfig {
            max_pwm: 20.0,
            ..Default::default()
        },
        plant_stiction: Some(stiction),
    }
}

#[test]
fn plant_estimation_stage_life_cycle() {
    let sim = sim_joint(SimJointParams::default());
    let designer = CompensatorDesigner::new(sim.clone(), &config(StictionConfig::default()))
        .expect("configure");
    let telemetry = designer.open_telemetry();

    designer
        .start_plant_estimation(&PlantEstimationOptions { max_time: 0.15 })
        .expect("start");
    assert!(!designer.is_done());

    // a second start while the stage runs is rejected without side effects
    assert!(matches!(
        designer.start_plant_estimation(&PlantEstimationOptions::default()),
        Err(DesignError::AlreadyRunning)
    ));

    // completion ordering: once the wait returns, the joint is restored
    assert!(designer.wait_until_done());
    assert!(designer.is_done());
    assert_eq!(sim.control_mode(0).unwrap(), ControlMode::Position);
    assert_eq!(sim.last_offset(), 0.0);

    let frames: Vec<_> = telemetry.try_iter().collect();
    assert!(!frames.is_empty());
    for frame in &frames {
        assert_eq!(frame.stage, Stage::PlantEstimation);
        assert_eq!(frame.data.len(), FRAME_WIDTH);
    }

    // consecutive queries without an intervening tick are identical
    let first = designer.results().expect("results");
    let second = designer.results().expect("results");
    assert_eq!(first, second);
    assert!(matches!(first, DesignResults::PlantEstimation { .. }));
}

#[test]
fn stage_can_be_restarted_after_completion() {
    let sim = sim_joint(SimJointParams::default());
    let designer = CompensatorDesigner::new(sim, &config(StictionConfig::default())).unwrap();

    designer
        .start_plant_estimation(&PlantEstimationOptions { max_time: 0.05 })
        .unwrap();
    assert!(designer.wait_until_done());

    designer
        .start_plant_estimation(&PlantEstimationOptions { max_time: 0.05 })
        .unwrap();
    assert!(designer.wait_until_done());
    assert!(designer.is_done());
}

#[test]
fn plant_validation_stage_produces_a_rollout() {
    let sim = sim_joint(SimJointParams {
        tau: 0.3,
        k: 1.5,
        ..Default::default()
    });
    let designer = CompensatorDesigner::new(sim, &config(StictionConfig::default())).unwrap();

    let mut opts = PlantValidationOptions::new(0.3, 1.5);
    opts.max_time = 0.1;
    designer.start_plant_validation(&opts).unwrap();
    assert!(designer.wait_until_done());

    match designer.results().unwrap() {
        DesignResults::PlantValidation { position, velocity } => {
            assert!(position.is_finite());
            assert!(velocity.is_finite());
        }
        other => panic!("unexpected results {other:?}"),
    }
}

#[test]
fn orchestrated_stiction_stage_honors_the_time_cap() {
    let stiction_cfg = StictionConfig {
        // a zero velocity threshold never arms the adaptation
        vel_thres: 0.0,
        ..Default::default()
    };
    let sim = sim_joint(SimJointParams::default());
    let designer = CompensatorDesigner::new(sim.clone(), &config(stiction_cfg)).unwrap();

    designer
        .start_stiction_estimation(&StictionEstimationOptions { max_time: 0.1 })
        .unwrap();
    assert!(designer.wait_until_done());
    assert_eq!(sim.control_mode(0).unwrap(), ControlMode::Position);

    match designer.results().unwrap() {
        DesignResults::StictionEstimation { stiction } => {
            assert_eq!(stiction, [0.0, 0.0]);
        }
        other => panic!("unexpected results {other:?}"),
    }
}

#[test]
fn standalone_stiction_estimator_life_cycle() {
    let sim = sim_joint(SimJointParams::default());
    let cfg = StictionConfig {
        vel_thres: 0.0,
        stiction: [0.1, -0.1],
        ..Default::default()
    };
    let estimator = StictionEstimator::new(sim.clone(), 0, &cfg).unwrap();

    estimator.start().unwrap();
    assert!(estimator.is_running());
    std::thread::sleep(Duration::from_millis(50));
    assert!(!estimator.is_done());

    estimator.stop();
    assert!(!estimator.is_running());
    assert_eq!(sim.control_mode(0).unwrap(), ControlMode::Position);
    // adaptation disabled: the offsets are still the configured priors
    let s = estimator.results();
    assert_eq!([s[0], s[1]], [0.1, -0.1]);
}

#[test]
fn controller_validation_writes_gains_and_alternates_set_points() {
    let sim = sim_joint(SimJointParams::default());
    let designer = CompensatorDesigner::new(sim.clone(), &config(StictionConfig::default()))
        .unwrap();
    let telemetry = designer.open_telemetry();

    let opts = ControllerValidationOptions {
        kp: 5.0,
        stiction: Some([0.2, -0.3]),
        ref_type: RefType::Square,
        ref_period: 0.03,
        max_time: 0.12,
    };
    designer.start_controller_validation(&opts).unwrap();
    assert!(designer.wait_until_done());

    // the candidate gains and offsets were written to the joint PID
    let pid = sim.pid(0).unwrap();
    assert_eq!(pid.kp, 5.0);
    assert_eq!(pid.stiction_up, 0.2);
    assert_eq!(pid.stiction_down, -0.3);

    // the reference alternated between the inset bounds
    let reference = sim.reference(0).unwrap();
    assert!(reference == 40.0 || reference == -40.0);

    let frames: Vec<_> = telemetry.try_iter().collect();
    assert!(!frames.is_empty());
    assert!(frames.iter().all(|f| f.stage == Stage::ControllerValidation));

    match designer.results().unwrap() {
        DesignResults::ControllerValidation { reference, .. } => {
            assert!(reference == 40.0 || reference == -40.0);
        }
        other => panic!("unexpected results {other:?}"),
    }
}

#[test]
fn controller_validation_matches_the_board_polarity() {
    let mut params = SimJointParams::default();
    params.pid.kp = -10.0;
    let sim = sim_joint(params);
    let designer = CompensatorDesigner::new(sim.clone(), &config(StictionConfig::default()))
        .unwrap();

    let mut opts = ControllerValidationOptions::new(5.0);
    opts.ref_period = 0.05;
    opts.max_time = 0.05;
    designer.start_controller_validation(&opts).unwrap();
    assert!(designer.wait_until_done());

    // the requested gain is flipped to the board's stored sign
    assert_eq!(sim.pid(0).unwrap().kp, -5.0);
}
