//! Session scheduler - alternates Mode A and Mode B forever
//!
//! Mode A plays drills back-to-back with a sampled first axis. Mode B runs the
//! sensor listener and reacts to occupancy. Each mode lasts a fixed duration
//! measured from mode entry; the deadline preempts whatever is in flight, and
//! the actuator is flushed before the next mode starts.
//!
//! The scheduler is the only place that decides when the listener stops: it
//! owns the cancel signal and joins the listener task before switching.

use crate::domain::library::PoseLibrary;
use crate::domain::types::{CueCode, Mode};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::cues::CueFanout;
use crate::io::sensor_listener::SensorListener;
use crate::services::executor::MotionExecutor;
use crate::services::sampler::NonRepeatingSampler;
use crate::services::zone_router::ZoneRouter;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Pause after a drill that confirmed no step, so a broken drill cannot spin
const DRILL_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Current mode and when it started
#[derive(Debug, Clone, Copy)]
pub struct Session {
    pub mode: Mode,
    pub entered_at: Instant,
    pub duration: Duration,
}

impl Session {
    fn enter(mode: Mode, duration: Duration) -> Self {
        Self { mode, entered_at: Instant::now(), duration }
    }

    pub fn deadline(&self) -> Instant {
        self.entered_at + self.duration
    }
}

/// Snapshot published on every change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerState {
    pub mode: Mode,
    /// Mode entries since start (1 = first Mode A)
    pub cycle: u64,
    pub cycle_id: Uuid,
    /// Sensor socket address while Mode B is listening
    pub listening_on: Option<SocketAddr>,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub mode_a: Duration,
    pub mode_b: Duration,
    pub sensor_bind_addr: String,
    pub mode_cues: bool,
    pub drill_seed: Option<u64>,
}

impl SchedulerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            mode_a: config.mode_a_duration(),
            mode_b: config.mode_b_duration(),
            sensor_bind_addr: config.sensor_bind_addr(),
            mode_cues: config.mode_cues(),
            drill_seed: config.drill_seed(),
        }
    }

    fn duration_for(&self, mode: Mode) -> Duration {
        match mode {
            Mode::A => self.mode_a,
            Mode::B => self.mode_b,
        }
    }
}

pub struct SessionScheduler {
    settings: SchedulerSettings,
    library: Arc<PoseLibrary>,
    sampler: NonRepeatingSampler,
    drill_rng: StdRng,
    executor: Arc<MotionExecutor>,
    router: Arc<ZoneRouter>,
    cues: Arc<CueFanout>,
    metrics: Arc<Metrics>,
    state_tx: watch::Sender<SchedulerState>,
}

impl SessionScheduler {
    pub fn new(
        settings: SchedulerSettings,
        library: Arc<PoseLibrary>,
        sampler: NonRepeatingSampler,
        executor: Arc<MotionExecutor>,
        router: Arc<ZoneRouter>,
        cues: Arc<CueFanout>,
        metrics: Arc<Metrics>,
    ) -> Self {
        // Offset the drill RNG so it does not mirror the sampler's stream
        let drill_rng = match settings.drill_seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(1)),
            None => StdRng::from_entropy(),
        };
        let (state_tx, _) = watch::channel(SchedulerState {
            mode: Mode::A,
            cycle: 0,
            cycle_id: Uuid::nil(),
            listening_on: None,
        });

        Self { settings, library, sampler, drill_rng, executor, router, cues, metrics, state_tx }
    }

    /// Observe mode changes
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state_tx.subscribe()
    }

    /// Alternate modes until `shutdown` flips to `true`
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut mode = Mode::A;
        let mut cycle = 0u64;

        loop {
            cycle += 1;
            let session = Session::enter(mode, self.settings.duration_for(mode));
            let cycle_id = Uuid::now_v7();
            self.state_tx.send_replace(SchedulerState {
                mode,
                cycle,
                cycle_id,
                listening_on: None,
            });

            info!(
                mode = %mode.as_str(),
                cycle = %cycle,
                cycle_id = %cycle_id,
                duration_secs = %session.duration.as_secs(),
                "mode_entered"
            );

            if self.settings.mode_cues {
                self.cues.send(CueCode::for_mode(mode)).await;
            }

            let stop = match mode {
                Mode::A => self.run_mode_a(&session, &mut shutdown).await,
                Mode::B => self.run_mode_b(&session, &mut shutdown).await,
            };

            // Leave nothing queued for the next mode
            if let Err(e) = self.executor.flush().await {
                error!(mode = %mode.as_str(), error = %e, "mode_exit_flush_failed");
            }

            if stop {
                info!(cycle = %cycle, "scheduler_stopped");
                return;
            }

            info!(
                from = %mode.as_str(),
                to = %mode.next().as_str(),
                elapsed_ms = %session.entered_at.elapsed().as_millis(),
                "mode_switch"
            );
            self.metrics.record_mode_switch();
            mode = mode.next();
        }
    }

    /// Drills until the deadline; returns true on shutdown
    async fn run_mode_a(&mut self, session: &Session, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = sleep_until(session.deadline()) => false,
            _ = wait_for_shutdown(shutdown) => true,
            _ = self.drill_loop() => false,
        }
    }

    async fn drill_loop(&mut self) {
        let library = self.library.clone();
        loop {
            let Some(drill) = library.random_drill(&mut self.drill_rng) else {
                warn!("no_drills_in_library");
                std::future::pending::<()>().await;
                return;
            };

            let (base, offset) = self.sampler.draw();
            let first_axis = base + offset;

            let made_progress = match self.executor.run_sequence(drill, Some(first_axis)).await {
                Ok(outcome) => outcome.steps_completed > 0,
                Err(e) => {
                    warn!(drill = %drill.name, error = %e, "drill_failed");
                    false
                }
            };
            if !made_progress {
                sleep(DRILL_RETRY_DELAY).await;
            }
        }
    }

    /// Listen for the mode duration; returns true on shutdown
    async fn run_mode_b(&mut self, session: &Session, shutdown: &mut watch::Receiver<bool>) -> bool {
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let bind = SensorListener::bind(&self.settings.sensor_bind_addr, self.metrics.clone());
        let listener = match bind.await {
            Ok(listener) => Some(listener),
            Err(e) => {
                error!(addr = %self.settings.sensor_bind_addr, error = %e, "sensor_bind_failed");
                None
            }
        };

        let handle = listener.map(|listener| {
            let addr = listener.local_addr().ok();
            self.state_tx.send_modify(|state| state.listening_on = addr);
            let router = self.router.clone();
            tokio::spawn(async move { listener.run(router.as_ref(), cancel_rx).await })
        });

        let stop = tokio::select! {
            _ = sleep_until(session.deadline()) => false,
            _ = wait_for_shutdown(shutdown) => true,
        };

        let _ = cancel_tx.send(true);
        if let Some(handle) = handle {
            match handle.await {
                Ok(stats) => info!(
                    received = %stats.received,
                    decoded = %stats.decoded,
                    rejected = %stats.rejected,
                    stale_dropped = %stats.stale_dropped,
                    "mode_b_listener_joined"
                ),
                Err(e) => error!(error = %e, "sensor_listener_task_failed"),
            }
        }
        self.state_tx.send_modify(|state| state.listening_on = None);

        stop
    }
}

/// Resolves once shutdown is signalled; never resolves if the sender is gone
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
