//! In-process simulated arm
//!
//! Moves are queued FIFO and completed one at a time by a worker task after
//! `step` has elapsed, then reported through the notify callback. Abort bumps
//! a generation counter so queued and in-flight moves never complete.
//!
//! Used by the daemon in `sim` mode for dry runs and by the tests, which also
//! use the call log and the scripted failure hooks. The call log is off unless
//! enabled with `with_call_log`, so a long dry run does not grow it.

use crate::domain::types::{
    DigitalOutput, JointPose, MotionState, MoveMode, MoveTicket, OperationMode,
};
use crate::io::actuator::{Actuator, ActuatorError, NotifyCallback};
use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// One command received by the simulated arm
#[derive(Debug, Clone, PartialEq)]
pub enum ActuatorCall {
    SetOperationMode(OperationMode),
    SetOverrideRatio(u8),
    SetSpeed(u8),
    Move {
        ticket: MoveTicket,
        mode: MoveMode,
        joints: JointPose,
        /// Queue depth when the move arrived
        pending_before: usize,
    },
    Abort,
    SetDigitalOutputs(Vec<DigitalOutput>),
}

#[derive(Debug)]
struct QueuedMove {
    ticket: MoveTicket,
    generation: u64,
}

#[derive(Debug, Default)]
struct SimState {
    log_calls: bool,
    calls: Vec<ActuatorCall>,
    generation: u64,
    queued: usize,
    backlog: usize,
    stuck: usize,
    moves_seen: usize,
    move_failures: FxHashMap<usize, i64>,
    speed_failure: Option<i64>,
    silent: bool,
    inline_completion: bool,
}

impl SimState {
    fn pending(&self) -> usize {
        (self.queued + self.backlog).max(self.stuck)
    }

    fn record(&mut self, call: ActuatorCall) {
        if self.log_calls {
            self.calls.push(call);
        }
    }
}

pub struct SimulatedActuator {
    state: Arc<Mutex<SimState>>,
    queue_tx: mpsc::UnboundedSender<QueuedMove>,
    notify: NotifyCallback,
}

impl SimulatedActuator {
    /// Create the arm and spawn its worker; must be called inside a tokio runtime
    pub fn new(step: Duration, notify: NotifyCallback) -> Self {
        let state = Arc::new(Mutex::new(SimState::default()));
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(state.clone(), queue_rx, step, notify.clone()));
        Self { state, queue_tx, notify }
    }

    /// Record every command from now on, for `calls` and `moves`
    pub fn with_call_log(self) -> Self {
        self.state.lock().log_calls = true;
        self
    }

    /// Every command received so far, in order
    pub fn calls(&self) -> Vec<ActuatorCall> {
        self.state.lock().calls.clone()
    }

    /// Joint targets of every move received so far
    pub fn moves(&self) -> Vec<JointPose> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                ActuatorCall::Move { joints, .. } => Some(*joints),
                _ => None,
            })
            .collect()
    }

    /// Reject the `nth` move (zero-based, counted over the arm's lifetime) with `code`
    pub fn fail_move(&self, nth: usize, code: i64) {
        self.state.lock().move_failures.insert(nth, code);
    }

    /// Reject every speed command with `code`
    pub fn fail_speed(&self, code: i64) {
        self.state.lock().speed_failure = Some(code);
    }

    /// Accept moves but never report completion
    pub fn set_silent(&self, silent: bool) {
        self.state.lock().silent = silent;
    }

    /// Report completion before `move_joints` returns
    pub fn set_inline_completion(&self, inline: bool) {
        self.state.lock().inline_completion = inline;
    }

    /// Pretend `count` commands are queued from an earlier session; abort clears them
    pub fn inject_backlog(&self, count: usize) {
        self.state.lock().backlog += count;
    }

    /// Pending count never drops below `count`, even after abort
    pub fn stick_pending(&self, count: usize) {
        self.state.lock().stuck = count;
    }
}

async fn run_worker(
    state: Arc<Mutex<SimState>>,
    mut queue_rx: mpsc::UnboundedReceiver<QueuedMove>,
    step: Duration,
    notify: NotifyCallback,
) {
    while let Some(job) = queue_rx.recv().await {
        if state.lock().generation != job.generation {
            continue;
        }

        tokio::time::sleep(step).await;

        let deliver = {
            let mut s = state.lock();
            if s.generation != job.generation {
                continue;
            }
            s.queued = s.queued.saturating_sub(1);
            !s.silent
        };

        if deliver {
            debug!(ticket = %job.ticket, "sim_move_completed");
            notify(job.ticket);
        }
    }
}

#[async_trait]
impl Actuator for SimulatedActuator {
    async fn set_operation_mode(&self, mode: OperationMode) -> Result<(), ActuatorError> {
        self.state.lock().record(ActuatorCall::SetOperationMode(mode));
        Ok(())
    }

    async fn set_override_ratio(&self, percent: u8) -> Result<(), ActuatorError> {
        self.state.lock().record(ActuatorCall::SetOverrideRatio(percent));
        Ok(())
    }

    async fn set_speed(&self, percent: u8) -> Result<(), ActuatorError> {
        let mut s = self.state.lock();
        s.record(ActuatorCall::SetSpeed(percent));
        match s.speed_failure {
            Some(code) => Err(ActuatorError::Status { op: "set_speed", code }),
            None => Ok(()),
        }
    }

    async fn move_joints(
        &self,
        ticket: MoveTicket,
        mode: MoveMode,
        joints: &JointPose,
    ) -> Result<(), ActuatorError> {
        let inline = {
            let mut s = self.state.lock();
            let pending_before = s.pending();
            s.record(ActuatorCall::Move { ticket, mode, joints: *joints, pending_before });

            let nth = s.moves_seen;
            s.moves_seen += 1;
            if let Some(code) = s.move_failures.remove(&nth) {
                return Err(ActuatorError::Status { op: "move", code });
            }

            if s.inline_completion {
                !s.silent
            } else {
                s.queued += 1;
                let job = QueuedMove { ticket, generation: s.generation };
                if self.queue_tx.send(job).is_err() {
                    s.queued -= 1;
                    return Err(ActuatorError::Disconnected);
                }
                false
            }
        };

        if inline {
            (self.notify)(ticket);
        }
        Ok(())
    }

    async fn abort(&self) -> Result<(), ActuatorError> {
        let mut s = self.state.lock();
        s.record(ActuatorCall::Abort);
        s.generation += 1;
        s.queued = 0;
        s.backlog = 0;
        Ok(())
    }

    async fn pending_commands(&self) -> Result<usize, ActuatorError> {
        Ok(self.state.lock().pending())
    }

    async fn motion_state(&self) -> Result<MotionState, ActuatorError> {
        let s = self.state.lock();
        Ok(if s.pending() > 0 { MotionState::Moving } else { MotionState::Idle })
    }

    async fn set_digital_outputs(&self, outputs: &[DigitalOutput]) -> Result<(), ActuatorError> {
        self.state.lock().record(ActuatorCall::SetDigitalOutputs(outputs.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    const POSE: JointPose = JointPose([10.0, 0.0, 0.0, 0.0, 0.0, 0.0]);

    fn sim(step_ms: u64) -> (SimulatedActuator, UnboundedReceiver<MoveTicket>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let notify: NotifyCallback = Arc::new(move |ticket| {
            let _ = tx.send(ticket);
        });
        (SimulatedActuator::new(Duration::from_millis(step_ms), notify).with_call_log(), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_moves_complete_in_order() {
        let (arm, mut done) = sim(500);
        arm.move_joints(MoveTicket(1), MoveMode::Absolute, &POSE).await.unwrap();
        arm.move_joints(MoveTicket(2), MoveMode::Absolute, &POSE).await.unwrap();
        assert_eq!(arm.pending_commands().await.unwrap(), 2);
        assert_eq!(arm.motion_state().await.unwrap(), MotionState::Moving);

        assert_eq!(done.recv().await, Some(MoveTicket(1)));
        assert_eq!(done.recv().await, Some(MoveTicket(2)));
        assert_eq!(arm.pending_commands().await.unwrap(), 0);
        assert_eq!(arm.motion_state().await.unwrap(), MotionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_discards_queue() {
        let (arm, mut done) = sim(500);
        arm.inject_backlog(4);
        arm.move_joints(MoveTicket(1), MoveMode::Absolute, &POSE).await.unwrap();
        assert_eq!(arm.pending_commands().await.unwrap(), 5);

        arm.abort().await.unwrap();
        assert_eq!(arm.pending_commands().await.unwrap(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(done.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scripted_failure_and_call_log() {
        let (arm, _done) = sim(500);
        arm.fail_move(1, -4);
        arm.move_joints(MoveTicket(1), MoveMode::Absolute, &POSE).await.unwrap();
        let err = arm.move_joints(MoveTicket(2), MoveMode::Absolute, &POSE).await.unwrap_err();
        assert_eq!(err.status_code(), Some(-4));
        assert_eq!(arm.moves().len(), 2);

        arm.set_digital_outputs(&[DigitalOutput { channel: 8, value: true }]).await.unwrap();
        assert_eq!(
            arm.calls().last(),
            Some(&ActuatorCall::SetDigitalOutputs(vec![DigitalOutput { channel: 8, value: true }]))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_log_is_opt_in() {
        let notify: NotifyCallback = Arc::new(|_| {});
        let arm = SimulatedActuator::new(Duration::from_millis(10), notify);
        for n in 0..100 {
            arm.set_speed(50).await.unwrap();
            arm.move_joints(MoveTicket(n), MoveMode::Absolute, &POSE).await.unwrap();
            arm.set_digital_outputs(&[DigitalOutput { channel: 8, value: true }]).await.unwrap();
        }
        arm.abort().await.unwrap();
        assert!(arm.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_never_notifies() {
        let (arm, mut done) = sim(100);
        arm.set_silent(true);
        arm.move_joints(MoveTicket(1), MoveMode::Absolute, &POSE).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(done.try_recv().is_err());
        assert_eq!(arm.pending_commands().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_inline_completion() {
        let (arm, mut done) = sim(100);
        arm.set_inline_completion(true);
        arm.move_joints(MoveTicket(9), MoveMode::Absolute, &POSE).await.unwrap();
        assert_eq!(done.try_recv().ok(), Some(MoveTicket(9)));
    }

    #[tokio::test]
    async fn test_stuck_pending_survives_abort() {
        let (arm, _done) = sim(100);
        arm.stick_pending(2);
        arm.abort().await.unwrap();
        assert_eq!(arm.pending_commands().await.unwrap(), 2);
    }
}
