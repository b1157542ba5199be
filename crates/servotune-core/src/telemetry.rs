//! Telemetry publication
//!
//! Each tick of an identification stage publishes one fixed-width numeric
//! frame. The first three slots carry (voltage, position, reference)-like
//! quantities, the remainder is stage-specific and zero-padded, so off-line
//! logs from different stages stay column-aligned.

use crossbeam_channel::{unbounded, Receiver, Sender};

/// Number of values in every telemetry frame.
pub const FRAME_WIDTH: usize = 8;

/// Identification/validation stage a frame originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    PlantEstimation,
    PlantValidation,
    StictionEstimation,
    ControllerValidation,
}

/// One telemetry sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryFrame {
    pub stage: Stage,
    pub data: [f64; FRAME_WIDTH],
}

impl TelemetryFrame {
    /// Build a frame from a stage-specific prefix, zero-padding to
    /// [`FRAME_WIDTH`]. Longer prefixes are truncated.
    pub fn padded(stage: Stage, prefix: &[f64]) -> Self {
        let mut data = [0.0; FRAME_WIDTH];
        for (slot, value) in data.iter_mut().zip(prefix.iter()) {
            *slot = *value;
        }
        Self { stage, data }
    }
}

/// Publication endpoint held by the periodic task.
///
/// Frames are produced only while a subscriber is attached; a dropped
/// receiver closes the port again.
#[derive(Debug, Default)]
pub struct TelemetryPort {
    tx: Option<Sender<TelemetryFrame>>,
}

impl TelemetryPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a subscriber, replacing any previous one.
    pub fn open(&mut self) -> Receiver<TelemetryFrame> {
        let (tx, rx) = unbounded();
        self.tx = Some(tx);
        rx
    }

    /// Whether frames are currently being consumed.
    pub fn is_open(&self) -> bool {
        self.tx.is_some()
    }

    /// Publish one frame; silently drops it when nobody listens.
    pub fn publish(&mut self, frame: TelemetryFrame) {
        if let Some(tx) = &self.tx {
            if tx.send(frame).is_err() {
                self.tx = None;
            }
        }
    }
}
