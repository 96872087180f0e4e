//! Occupancy report → cue + reaction sequence
//!
//! Regions are scanned in fixed priority order ("1" before "2" ...). The
//! first region whose first zone entry holds at least one person decides the
//! whole report: its key picks the cue letter and the reaction sequence.
//! Lower-priority regions are never looked at.

use crate::domain::library::PoseLibrary;
use crate::domain::types::{OccupancyReport, SequenceKey, ZoneLetter, REGION_PRIORITY};
use crate::infra::metrics::Metrics;
use crate::io::cues::CueFanout;
use crate::io::sensor_listener::ReportHandler;
use crate::services::executor::{MotionError, MotionExecutor, SequenceOutcome};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a single report led to
#[derive(Debug)]
pub enum RouteOutcome {
    /// No region in the priority list was occupied
    Idle,
    /// Key derived but no reaction registered for it
    Unmapped(SequenceKey),
    Executed { key: SequenceKey, outcome: SequenceOutcome },
    Failed { key: SequenceKey, error: MotionError },
}

/// First occupied region in priority order, as (region id, key)
pub fn select_region(report: &OccupancyReport) -> Option<(&'static str, SequenceKey)> {
    REGION_PRIORITY.iter().find_map(|&id| {
        let count = report.region(id)?.people_count();
        let zone = ZoneLetter::from_region_id(id)?;
        SequenceKey::derive(count, zone).map(|key| (id, key))
    })
}

pub struct ZoneRouter {
    library: Arc<PoseLibrary>,
    executor: Arc<MotionExecutor>,
    cues: Arc<CueFanout>,
    metrics: Arc<Metrics>,
    /// Only cue when the key has a registered reaction
    require_sequence: bool,
}

impl ZoneRouter {
    pub fn new(
        library: Arc<PoseLibrary>,
        executor: Arc<MotionExecutor>,
        cues: Arc<CueFanout>,
        metrics: Arc<Metrics>,
        require_sequence: bool,
    ) -> Self {
        Self { library, executor, cues, metrics, require_sequence }
    }

    pub async fn route(&self, report: &OccupancyReport) -> RouteOutcome {
        let Some((region, key)) = select_region(report) else {
            debug!(regions = %report.regions.len(), "report_idle");
            return RouteOutcome::Idle;
        };

        let cue = key.cue();
        let sequence = self.library.reaction(&key);
        info!(
            region = %region,
            key = %key,
            cue = %cue,
            registered = %sequence.is_some(),
            "region_selected"
        );

        if sequence.is_some() || !self.require_sequence {
            self.cues.send(cue).await;
        }

        let Some(sequence) = sequence else {
            self.metrics.record_reaction_unmapped();
            warn!(key = %key, "reaction_not_registered");
            return RouteOutcome::Unmapped(key);
        };

        self.metrics.record_reaction();
        match self.executor.run_sequence(sequence, None).await {
            Ok(outcome) => RouteOutcome::Executed { key, outcome },
            Err(error) => RouteOutcome::Failed { key, error },
        }
    }
}

#[async_trait]
impl ReportHandler for ZoneRouter {
    async fn handle(&self, report: OccupancyReport) {
        self.route(&report).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{CueCode, JointPose, MotionSequence};
    use crate::io::sim_actuator::SimulatedActuator;
    use crate::services::completion::CompletionRouter;
    use crate::services::executor::ExecutorSettings;
    use std::time::Duration;
    use tokio::net::UdpSocket;

    fn report(json: &str) -> OccupancyReport {
        OccupancyReport::from_slice(json.as_bytes()).unwrap()
    }

    struct Rig {
        router: ZoneRouter,
        arm: Arc<SimulatedActuator>,
        audio: UdpSocket,
        lighting: UdpSocket,
        metrics: Arc<Metrics>,
    }

    async fn rig(library: PoseLibrary, require_sequence: bool) -> Rig {
        let metrics = Arc::new(Metrics::new());
        let completions = Arc::new(CompletionRouter::new());
        let arm = Arc::new(
            SimulatedActuator::new(Duration::from_millis(10), completions.callback()).with_call_log(),
        );
        let executor = Arc::new(MotionExecutor::new(
            arm.clone(),
            completions,
            metrics.clone(),
            ExecutorSettings::default(),
        ));

        let audio = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let lighting = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let cues = CueFanout::bind(
            &audio.local_addr().unwrap().to_string(),
            &lighting.local_addr().unwrap().to_string(),
            true,
            metrics.clone(),
        )
        .await
        .unwrap();

        let router =
            ZoneRouter::new(Arc::new(library), executor, Arc::new(cues), metrics.clone(), require_sequence);
        Rig { router, arm, audio, lighting, metrics }
    }

    /// Reactions with a single zero pose and no settle, so tests stay fast
    fn quick_library(keys: &[&str]) -> PoseLibrary {
        let reactions = keys
            .iter()
            .map(|k| MotionSequence::new(*k, vec![JointPose([0.0; 6])], vec![50]))
            .collect();
        PoseLibrary::new(Vec::new(), reactions)
    }

    async fn recv_cue(socket: &UdpSocket) -> Option<CueCode> {
        let mut buf = [0u8; 8];
        let (len, _) = tokio::time::timeout(Duration::from_millis(500), socket.recv_from(&mut buf))
            .await
            .ok()?
            .ok()?;
        (len == 1).then(|| CueCode(buf[0] as char))
    }

    #[test]
    fn test_select_region_priority() {
        let r = report(
            r#"[{"ID": "2", "Zone": [{"PeopleCount": 2}]}, {"ID": "1", "Zone": [{"PeopleCount": 1}]}]"#,
        );
        let (region, key) = select_region(&r).unwrap();
        assert_eq!(region, "1");
        assert_eq!(key.to_string(), "1-A");
    }

    #[test]
    fn test_select_region_ignores_empty_and_unknown() {
        let r = report(
            r#"[{"ID": "7", "Zone": [{"PeopleCount": 3}]},
                {"ID": "1", "Zone": [{"PeopleCount": 0}]},
                {"ID": "2", "Zone": []},
                {"ID": "4", "Zone": [{"PeopleCount": 5}]}]"#,
        );
        let (region, key) = select_region(&r).unwrap();
        assert_eq!(region, "4");
        assert_eq!(key, SequenceKey::Overflow);

        assert!(select_region(&report(r#"[{"ID": "9", "Zone": [{"PeopleCount": 1}]}]"#)).is_none());
        assert!(select_region(&report("[]")).is_none());
    }

    #[test]
    fn test_first_zone_entry_decides() {
        let r = report(r#"[{"ID": "3", "Zone": [{"PeopleCount": 0}, {"PeopleCount": 2}]}]"#);
        assert!(select_region(&r).is_none());
    }

    #[tokio::test]
    async fn test_two_people_in_region_two() {
        let rig = rig(quick_library(&["2-B"]), false).await;
        let r = report(r#"[{"ID": "2", "Zone": [{"PeopleCount": 2, "PeoplePosition": []}]}]"#);

        let outcome = rig.router.route(&r).await;
        assert!(matches!(
            outcome,
            RouteOutcome::Executed { outcome: SequenceOutcome { steps_completed: 1, .. }, .. }
        ));
        assert_eq!(recv_cue(&rig.audio).await, Some(CueCode('H')));
        assert_eq!(recv_cue(&rig.lighting).await, Some(CueCode('H')));
        assert_eq!(rig.arm.moves().len(), 1);
        assert_eq!(rig.metrics.reactions_triggered(), 1);
    }

    #[tokio::test]
    async fn test_only_highest_priority_region_triggers() {
        let rig = rig(quick_library(&["1-A", "2-B"]), false).await;
        let r = report(
            r#"[{"ID": "1", "Zone": [{"PeopleCount": 1}]}, {"ID": "2", "Zone": [{"PeopleCount": 2}]}]"#,
        );

        let outcome = rig.router.route(&r).await;
        match outcome {
            RouteOutcome::Executed { key, .. } => assert_eq!(key.to_string(), "1-A"),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(recv_cue(&rig.audio).await, Some(CueCode('C')));
        assert_eq!(recv_cue(&rig.audio).await, None);
        assert_eq!(rig.arm.moves().len(), 1);
    }

    #[tokio::test]
    async fn test_overflow_uses_shared_key() {
        let rig = rig(PoseLibrary::builtin(), false).await;
        let r = report(r#"[{"ID": "3", "Zone": [{"PeopleCount": 5}]}]"#);
        let (_, key) = select_region(&r).unwrap();
        assert_eq!(key, SequenceKey::Overflow);
        assert!(rig.router.library.reaction(&key).is_some());
    }

    #[tokio::test]
    async fn test_unmapped_key_still_cues_by_default() {
        let rig = rig(quick_library(&[]), false).await;
        let r = report(r#"[{"ID": "4", "Zone": [{"PeopleCount": 3}]}]"#);

        assert!(matches!(rig.router.route(&r).await, RouteOutcome::Unmapped(_)));
        assert_eq!(recv_cue(&rig.audio).await, Some(CueCode('N')));
        assert!(rig.arm.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unmapped_key_silent_when_sequence_required() {
        let rig = rig(quick_library(&[]), true).await;
        let r = report(r#"[{"ID": "4", "Zone": [{"PeopleCount": 3}]}]"#);

        assert!(matches!(rig.router.route(&r).await, RouteOutcome::Unmapped(_)));
        assert_eq!(recv_cue(&rig.audio).await, None);
        assert_eq!(rig.metrics.cues_sent(), 0);
    }

    #[tokio::test]
    async fn test_idle_report_does_nothing() {
        let rig = rig(quick_library(&["1-A"]), false).await;
        let r = report(r#"[{"ID": "1", "Zone": [{"PeopleCount": 0}]}]"#);

        assert!(matches!(rig.router.route(&r).await, RouteOutcome::Idle));
        assert_eq!(recv_cue(&rig.audio).await, None);
        assert!(rig.arm.calls().is_empty());
    }

    #[tokio::test]
    async fn test_broken_reaction_reports_failure() {
        let library = PoseLibrary::new(
            Vec::new(),
            vec![MotionSequence::new("1-B", vec![JointPose([0.0; 6]); 2], vec![50])],
        );
        let rig = rig(library, false).await;
        let r = report(r#"[{"ID": "2", "Zone": [{"PeopleCount": 1}]}]"#);

        match rig.router.route(&r).await {
            RouteOutcome::Failed { error, .. } => assert!(error.is_config_error()),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(rig.arm.calls().is_empty());
    }
}
