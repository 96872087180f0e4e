//! Actuator interface - the arm controller as seen by the motion layer
//!
//! The vendor motion-control SDK is an external collaborator. Everything the
//! controller needs from it is expressed by the `Actuator` trait; completion
//! of a move is reported asynchronously through a `NotifyCallback` carrying
//! the ticket the move was issued with.

use crate::domain::types::{
    DigitalOutput, JointPose, MotionState, MoveMode, MoveTicket, OperationMode,
};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Invoked by the actuator when the move with the given ticket completes
pub type NotifyCallback = Arc<dyn Fn(MoveTicket) + Send + Sync>;

#[derive(Debug, Error)]
pub enum ActuatorError {
    /// Controller returned a non-zero status for a command
    #[error("{op} rejected with status {code}")]
    Status { op: &'static str, code: i64 },

    #[error("failed to connect to actuator at {addr}: {reason}")]
    Connect { addr: String, reason: String },

    #[error("actuator connection closed")]
    Disconnected,

    #[error("no reply to {op} within {timeout_ms} ms")]
    ReplyTimeout { op: &'static str, timeout_ms: u64 },

    #[error("actuator protocol error: {0}")]
    Protocol(String),

    #[error("actuator I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ActuatorError {
    /// Status code when the controller rejected the command
    pub fn status_code(&self) -> Option<i64> {
        match self {
            ActuatorError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Commands the arm controller accepts
///
/// Implementations must be safe to share, but the motion layer guarantees a
/// single writer: commands are never issued concurrently.
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn set_operation_mode(&self, mode: OperationMode) -> Result<(), ActuatorError>;

    /// Global speed scaling applied on top of per-move speeds
    async fn set_override_ratio(&self, percent: u8) -> Result<(), ActuatorError>;

    /// PTP speed for subsequent moves
    async fn set_speed(&self, percent: u8) -> Result<(), ActuatorError>;

    /// Queue a joint-space move; completion is reported via the notify callback
    async fn move_joints(
        &self,
        ticket: MoveTicket,
        mode: MoveMode,
        joints: &JointPose,
    ) -> Result<(), ActuatorError>;

    /// Stop the current motion and discard queued moves
    async fn abort(&self) -> Result<(), ActuatorError>;

    async fn pending_commands(&self) -> Result<usize, ActuatorError>;

    async fn motion_state(&self) -> Result<MotionState, ActuatorError>;

    async fn set_digital_outputs(&self, outputs: &[DigitalOutput]) -> Result<(), ActuatorError>;
}
