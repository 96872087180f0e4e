//! Motion executor - runs one sequence against the actuator
//!
//! Every run starts by flushing the actuator queue. Each step then:
//! 1. sets the step speed
//! 2. fires the step's `before` toggles
//! 3. issues the move and waits for its own completion notification
//! 4. fires the step's `after` toggles, then waits the sequence settle time
//!
//! Completion is event-driven only, bounded by `completion_timeout`.
//!
//! Outputs switched on by a toggle stay latched until a later toggle clears
//! them. Every flush drives the latched ones back off, so a sequence cut short
//! by a timeout, an aborting rejection or a mode deadline leaves no output on.

use crate::domain::types::{DigitalOutput, MotionSequence, MoveMode, ToggleTiming};
use crate::infra::config::{Config, MoveFailurePolicy};
use crate::infra::metrics::Metrics;
use crate::io::actuator::{Actuator, ActuatorError};
use crate::services::completion::CompletionRouter;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum MotionError {
    #[error("sequence {name}: {speeds} speeds for {poses} poses")]
    ConfigMismatch { name: String, poses: usize, speeds: usize },

    #[error("sequence {name}: toggle at step {step} but only {poses} steps")]
    InvalidToggle { name: String, step: usize, poses: usize },

    #[error("sequence {name}: move at step {step} rejected: {source}")]
    MoveRejected {
        name: String,
        step: usize,
        #[source]
        source: ActuatorError,
    },

    #[error("sequence {name}: step {step} not confirmed within {timeout_ms} ms")]
    CompletionTimeout { name: String, step: usize, timeout_ms: u64 },

    #[error("sequence {name}: completion wait for step {step} was cancelled")]
    CompletionCancelled { name: String, step: usize },

    #[error("actuator still reports {pending} pending commands after {timeout_ms} ms")]
    FlushTimeout { pending: usize, timeout_ms: u64 },

    #[error(transparent)]
    Actuator(#[from] ActuatorError),
}

impl MotionError {
    /// Sequence definition problem detected before any command was issued
    pub fn is_config_error(&self) -> bool {
        matches!(self, MotionError::ConfigMismatch { .. } | MotionError::InvalidToggle { .. })
    }
}

/// Result of a sequence run that reached its last step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SequenceOutcome {
    /// Steps whose completion was confirmed
    pub steps_completed: usize,
    /// Steps whose move was rejected and skipped
    pub steps_skipped: usize,
}

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub completion_timeout: Duration,
    pub flush_timeout: Duration,
    pub flush_poll: Duration,
    pub failure_policy: MoveFailurePolicy,
}

impl ExecutorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            completion_timeout: config.completion_timeout(),
            flush_timeout: config.flush_timeout(),
            flush_poll: config.flush_poll(),
            failure_policy: config.move_failure_policy(),
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Single writer on the actuator connection; callers serialize runs
pub struct MotionExecutor {
    actuator: Arc<dyn Actuator>,
    completions: Arc<CompletionRouter>,
    metrics: Arc<Metrics>,
    settings: ExecutorSettings,
    /// Last value written per output channel since the previous flush
    latched: Mutex<FxHashMap<u16, bool>>,
}

impl MotionExecutor {
    pub fn new(
        actuator: Arc<dyn Actuator>,
        completions: Arc<CompletionRouter>,
        metrics: Arc<Metrics>,
        settings: ExecutorSettings,
    ) -> Self {
        Self { actuator, completions, metrics, settings, latched: Mutex::new(FxHashMap::default()) }
    }

    /// Run `sequence`, replacing every step's first axis with `first_axis` when given
    pub async fn run_sequence(
        &self,
        sequence: &MotionSequence,
        first_axis: Option<f64>,
    ) -> Result<SequenceOutcome, MotionError> {
        if let Err(e) = validate(sequence) {
            self.metrics.record_config_error();
            error!(sequence = %sequence.name, error = %e, "sequence_config_error");
            return Err(e);
        }

        self.metrics.record_sequence_started();
        info!(
            sequence = %sequence.name,
            steps = %sequence.poses.len(),
            first_axis = ?first_axis,
            "sequence_started"
        );

        match self.execute(sequence, first_axis).await {
            Ok(outcome) => {
                self.metrics.record_sequence_completed();
                info!(
                    sequence = %sequence.name,
                    steps_completed = %outcome.steps_completed,
                    steps_skipped = %outcome.steps_skipped,
                    "sequence_completed"
                );
                Ok(outcome)
            }
            Err(e) => {
                self.metrics.record_sequence_failed();
                error!(sequence = %sequence.name, error = %e, "sequence_failed");
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        sequence: &MotionSequence,
        first_axis: Option<f64>,
    ) -> Result<SequenceOutcome, MotionError> {
        self.flush().await?;

        let mut outcome = SequenceOutcome::default();
        let settle = Duration::from_millis(sequence.settle_ms);

        for (step, (template, &speed)) in sequence.poses.iter().zip(&sequence.speeds).enumerate() {
            if let Err(e) = self.actuator.set_speed(speed).await {
                self.aux_command_failed("set_speed", step, &e);
            }

            self.apply_toggles(sequence, step, ToggleTiming::Before).await;

            let pose = match first_axis {
                Some(j1) => template.with_first_axis(j1),
                None => *template,
            };

            let started = Instant::now();
            let ticket = self.completions.next_ticket();
            let done = self.completions.register(ticket);

            debug!(sequence = %sequence.name, step = %step, ticket = %ticket, pose = %pose, "move_issued");

            let confirmed = match self.actuator.move_joints(ticket, MoveMode::Absolute, &pose).await {
                Ok(()) => {
                    match tokio::time::timeout(self.settings.completion_timeout, done).await {
                        Ok(Ok(())) => true,
                        Ok(Err(_)) => {
                            return Err(MotionError::CompletionCancelled {
                                name: sequence.name.clone(),
                                step,
                            })
                        }
                        Err(_) => return Err(self.completion_timed_out(sequence, step).await),
                    }
                }
                Err(e) => {
                    self.completions.cancel(ticket);
                    self.metrics.record_move_rejected();
                    warn!(
                        sequence = %sequence.name,
                        step = %step,
                        error = %e,
                        policy = ?self.settings.failure_policy,
                        "move_rejected"
                    );
                    if self.settings.failure_policy == MoveFailurePolicy::Abort {
                        if let Err(flush_err) = self.flush().await {
                            error!(error = %flush_err, "flush_after_rejection_failed");
                        }
                        return Err(MotionError::MoveRejected {
                            name: sequence.name.clone(),
                            step,
                            source: e,
                        });
                    }
                    false
                }
            };

            if confirmed {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                self.metrics.record_step_completed(elapsed_ms);
                outcome.steps_completed += 1;
                debug!(sequence = %sequence.name, step = %step, elapsed_ms = %elapsed_ms, "step_completed");
            } else {
                outcome.steps_skipped += 1;
            }

            self.apply_toggles(sequence, step, ToggleTiming::After).await;

            if confirmed && !settle.is_zero() {
                tokio::time::sleep(settle).await;
            }
        }

        Ok(outcome)
    }

    /// Abort the actuator and wait until its queue is empty
    ///
    /// Also switches latched outputs back off and drops every outstanding
    /// completion waiter, since aborted moves never complete.
    pub async fn flush(&self) -> Result<(), MotionError> {
        let aborted = self.actuator.abort().await;
        self.release_outputs().await;
        if let Err(e) = aborted {
            if matches!(e, ActuatorError::Status { .. }) {
                self.aux_command_failed("abort", 0, &e);
            } else {
                return Err(e.into());
            }
        }
        let orphaned = self.completions.cancel_all();
        if orphaned > 0 {
            debug!(orphaned = %orphaned, "completion_waiters_dropped");
        }

        let deadline = Instant::now() + self.settings.flush_timeout;
        loop {
            let pending = self.actuator.pending_commands().await?;
            if pending == 0 {
                self.metrics.record_flush();
                return Ok(());
            }
            if Instant::now() >= deadline {
                error!(pending = %pending, "actuator_flush_timeout");
                return Err(MotionError::FlushTimeout {
                    pending,
                    timeout_ms: self.settings.flush_timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(self.settings.flush_poll).await;
        }
    }

    async fn apply_toggles(&self, sequence: &MotionSequence, step: usize, timing: ToggleTiming) {
        for toggle in sequence.toggles_at(step, timing) {
            debug!(
                sequence = %sequence.name,
                step = %step,
                channel = %toggle.channel,
                value = %toggle.value,
                "digital_output_set"
            );
            // Latch before the write so a dropped run still gets released
            self.latched.lock().insert(toggle.channel, toggle.value);
            if let Err(e) = self.actuator.set_digital_outputs(&[toggle.output()]).await {
                self.aux_command_failed("set_digital_outputs", step, &e);
            }
        }
    }

    async fn release_outputs(&self) {
        let mut channels: Vec<u16> = self
            .latched
            .lock()
            .drain()
            .filter_map(|(channel, on)| on.then_some(channel))
            .collect();
        if channels.is_empty() {
            return;
        }
        channels.sort_unstable();

        info!(channels = ?channels, "digital_outputs_released");
        let outputs: Vec<DigitalOutput> =
            channels.iter().map(|&channel| DigitalOutput { channel, value: false }).collect();
        if let Err(e) = self.actuator.set_digital_outputs(&outputs).await {
            self.aux_command_failed("set_digital_outputs", 0, &e);
        }
    }

    async fn completion_timed_out(&self, sequence: &MotionSequence, step: usize) -> MotionError {
        self.metrics.record_completion_timeout();
        let state = match self.actuator.motion_state().await {
            Ok(state) => state.as_str(),
            Err(_) => "unknown",
        };
        error!(
            sequence = %sequence.name,
            step = %step,
            motion_state = %state,
            timeout_ms = %self.settings.completion_timeout.as_millis(),
            "completion_timeout"
        );
        if let Err(e) = self.flush().await {
            error!(error = %e, "flush_after_timeout_failed");
        }
        MotionError::CompletionTimeout {
            name: sequence.name.clone(),
            step,
            timeout_ms: self.settings.completion_timeout.as_millis() as u64,
        }
    }

    #[cold]
    fn aux_command_failed(&self, op: &'static str, step: usize, e: &ActuatorError) {
        self.metrics.record_aux_command_error();
        warn!(op = %op, step = %step, error = %e, "actuator_command_failed");
    }
}

fn validate(sequence: &MotionSequence) -> Result<(), MotionError> {
    let poses = sequence.poses.len();
    if sequence.speeds.len() != poses {
        return Err(MotionError::ConfigMismatch {
            name: sequence.name.clone(),
            poses,
            speeds: sequence.speeds.len(),
        });
    }
    if let Some(toggle) = sequence.toggles.iter().find(|t| t.step >= poses) {
        return Err(MotionError::InvalidToggle {
            name: sequence.name.clone(),
            step: toggle.step,
            poses,
        });
    }
    Ok(())
}
