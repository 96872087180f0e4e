//! End-to-end session tests on the simulated arm
//!
//! Timer-driven tests run with paused time, so the 15-minute modes pass instantly.

use iaoap::domain::types::{Mode, OccupancyReport, SequenceKey, ZoneLetter};
use iaoap::domain::PoseLibrary;
use iaoap::infra::{Config, Metrics};
use iaoap::io::{Actuator, CueFanout, SensorListener, SimulatedActuator};
use iaoap::services::{
    CompletionRouter, ExecutorSettings, MotionExecutor, NonRepeatingSampler, RouteOutcome,
    SchedulerSettings, SessionScheduler, ZoneRouter,
};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::net::UdpSocket;
use tokio::sync::watch;

fn config_from(toml: &str) -> Config {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(toml.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    Config::from_file(temp_file.path()).unwrap()
}

struct Installation {
    arm: Arc<SimulatedActuator>,
    executor: Arc<MotionExecutor>,
    router: Arc<ZoneRouter>,
    cues: Arc<CueFanout>,
    library: Arc<PoseLibrary>,
    metrics: Arc<Metrics>,
}

async fn installation(config: &Config) -> Installation {
    let metrics = Arc::new(Metrics::new());
    let completions = Arc::new(CompletionRouter::new());
    let arm = Arc::new(
        SimulatedActuator::new(config.sim_step(), completions.callback()).with_call_log(),
    );
    let executor = Arc::new(MotionExecutor::new(
        arm.clone(),
        completions,
        metrics.clone(),
        ExecutorSettings::from_config(config),
    ));
    let cues = Arc::new(CueFanout::from_config(config, metrics.clone()).await.unwrap());
    let library = Arc::new(PoseLibrary::builtin());
    let router = Arc::new(ZoneRouter::new(
        library.clone(),
        executor.clone(),
        cues.clone(),
        metrics.clone(),
        config.cue_requires_sequence(),
    ));
    Installation { arm, executor, router, cues, library, metrics }
}

#[tokio::test(start_paused = true)]
async fn test_fifteen_minute_modes_alternate() {
    let config = config_from(
        r#"
[session]
mode_a_secs = 900
mode_b_secs = 900

[sensor]
bind_address = "127.0.0.1"
port = 0

[cues]
enabled = false

[drill]
seed = 5
"#,
    );
    let parts = installation(&config).await;
    let sampler =
        NonRepeatingSampler::new(config.base_angles(), config.offsets(), config.drill_seed()).unwrap();
    let scheduler = SessionScheduler::new(
        SchedulerSettings::from_config(&config),
        parts.library.clone(),
        sampler,
        parts.executor.clone(),
        parts.router.clone(),
        parts.cues.clone(),
        parts.metrics.clone(),
    );
    let state = scheduler.subscribe();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(scheduler.run(shutdown_rx));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(state.borrow().mode, Mode::A);
    assert!(!parts.arm.moves().is_empty());

    // t = 15:01
    tokio::time::sleep(Duration::from_secs(841)).await;
    let snapshot = state.borrow().clone();
    assert_eq!(snapshot.mode, Mode::B);
    assert!(snapshot.listening_on.is_some());
    let moves_in_mode_a = parts.arm.moves().len();

    // t = 30:01
    tokio::time::sleep(Duration::from_secs(900)).await;
    let snapshot = state.borrow().clone();
    assert_eq!(snapshot.mode, Mode::A);
    assert!(snapshot.listening_on.is_none());
    assert_eq!(snapshot.cycle, 3);
    // No reports arrived, so Mode B issued no moves of its own
    assert!(parts.arm.moves().len() >= moves_in_mode_a);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(10), task).await.unwrap().unwrap();
    assert_eq!(parts.arm.pending_commands().await.unwrap(), 0);
}

#[tokio::test]
async fn test_report_over_udp_triggers_cue_and_reaction() {
    let audio = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let lighting = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let config = config_from(&format!(
        r#"
[actuator]
sim_step_ms = 5

[cues]
audio_addr = "{}"
lighting_addr = "{}"
"#,
        audio.local_addr().unwrap(),
        lighting.local_addr().unwrap()
    ));
    let parts = installation(&config).await;

    // 2 people in region "2" → key 2-B, cue H
    let report = OccupancyReport::from_slice(
        br#"[{"ID": "1", "Zone": [{"PeopleCount": 0, "PeoplePosition": []}]},
             {"ID": "2", "Zone": [{"PeopleCount": 2, "PeoplePosition": [
                {"x1": 0, "y1": 0, "x2": 10, "y2": 10}, {"x1": 20, "y1": 0, "x2": 30, "y2": 10}]}]}]"#,
    )
    .unwrap();

    let listener = SensorListener::bind("127.0.0.1:0", parts.metrics.clone()).await.unwrap();
    let sensor_addr = listener.local_addr().unwrap();
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let router = parts.router.clone();
    let task = tokio::spawn(async move { listener.run(router.as_ref(), cancel_rx).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    sender.send_to(&serde_json::to_vec(&report).unwrap(), sensor_addr).await.unwrap();

    let mut buf = [0u8; 8];
    let (len, _) = tokio::time::timeout(Duration::from_secs(2), audio.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..len], b"H");
    let (len, _) = tokio::time::timeout(Duration::from_secs(2), lighting.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..len], b"H");

    // The 2-B reaction settles 1 s after each step
    let key = SequenceKey::derive(2, ZoneLetter::B).unwrap();
    let expected = parts.library.reaction(&key).unwrap().poses.len();
    tokio::time::timeout(Duration::from_secs(15), async {
        while parts.metrics.steps_completed() < expected as u64 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    cancel_tx.send(true).unwrap();
    let stats = task.await.unwrap();
    assert_eq!(stats.decoded, 1);
    assert_eq!(parts.arm.moves().len(), expected);
    assert_eq!(parts.metrics.reactions_triggered(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unregistered_key_cues_without_motion() {
    let audio = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let config = config_from(&format!(
        "[cues]\naudio_addr = \"{0}\"\nlighting_addr = \"{0}\"\n",
        audio.local_addr().unwrap()
    ));
    let mut parts = installation(&config).await;
    parts.router = Arc::new(ZoneRouter::new(
        Arc::new(PoseLibrary::default()),
        parts.executor.clone(),
        parts.cues.clone(),
        parts.metrics.clone(),
        false,
    ));

    let report =
        OccupancyReport::from_slice(br#"[{"ID": "3", "Zone": [{"PeopleCount": 1}]}]"#).unwrap();
    let outcome = parts.router.route(&report).await;
    assert!(matches!(outcome, RouteOutcome::Unmapped(_)));

    let mut buf = [0u8; 8];
    let (len, _) = audio.recv_from(&mut buf).await.unwrap();
    assert_eq!(&buf[..len], b"E");
    assert!(parts.arm.calls().is_empty());
}
