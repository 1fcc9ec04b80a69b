//! Monitor coordinator behavior against a scripted forker and a local bus.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use orbit_events::{
    names, EndpointRole, ForkerRecord, IsolateDescriptor, IsolateState, IsolateStatusEvent,
    LocalSignalBus, LocalSignalHub, Signal, SignalBus, SignalGroup, SignalListener, FORKER_KIND,
};
use orbit_forker::{Forker, PingStatus, StartResult};
use orbit_id::ForkerId;
use orbit_monitor::{
    ForkerStopHandler, IsolateCondition, IsolateDirectory, MonitorConfig, MonitorCoordinator,
    MonitorError, MonitorSignalListener, StatusOutcome,
};
use serde_json::Value;

struct FakeForker {
    result: StartResult,
    starts: Mutex<Vec<String>>,
    stops: Mutex<Vec<String>>,
    stopping: AtomicBool,
}

impl FakeForker {
    fn new(result: StartResult) -> Arc<Self> {
        Arc::new(Self {
            result,
            starts: Mutex::new(Vec::new()),
            stops: Mutex::new(Vec::new()),
            stopping: AtomicBool::new(false),
        })
    }

    fn starts(&self) -> Vec<String> {
        self.starts.lock().unwrap().clone()
    }

    fn stops(&self) -> Vec<String> {
        self.stops.lock().unwrap().clone()
    }
}

#[async_trait]
impl Forker for FakeForker {
    async fn start_isolate(&self, descriptor: &IsolateDescriptor) -> StartResult {
        self.starts.lock().unwrap().push(descriptor.name.clone());
        self.result
    }

    async fn stop_isolate(&self, isolate: &str) {
        self.stops.lock().unwrap().push(isolate.to_string());
    }

    async fn ping(&self, isolate: &str) -> PingStatus {
        if self.stops.lock().unwrap().iter().any(|s| s == isolate) {
            PingStatus::Dead
        } else {
            PingStatus::Alive
        }
    }

    fn is_on_node(&self, _forker_id: &ForkerId, node: &str) -> bool {
        node == "node-a"
    }

    async fn set_platform_stopping(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    fn node_name(&self) -> &str {
        "node-a"
    }
}

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<(String, Value)>>,
}

impl Recorder {
    fn seen(&self) -> Vec<(String, Value)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl SignalListener for Recorder {
    async fn handle_signal(&self, signal: &Signal) -> Option<Value> {
        self.seen
            .lock()
            .unwrap()
            .push((signal.name.clone(), signal.content.clone()));
        None
    }
}

#[derive(Default)]
struct StopFlag(AtomicBool);

#[async_trait]
impl ForkerStopHandler for StopFlag {
    async fn stop_forker(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

struct Fixture {
    hub: Arc<LocalSignalHub>,
    bus: Arc<LocalSignalBus>,
    forker: Arc<FakeForker>,
    coordinator: Arc<MonitorCoordinator>,
    forker_stopped: Arc<StopFlag>,
}

/// Everything is running except `floating`, which was never launched.
fn directory() -> IsolateDirectory {
    let mut directory = IsolateDirectory::new();
    for name in ["iso1", "iso2", "iso3", "monitor"] {
        directory.insert(IsolateDescriptor::new(name, "native").on_node("node-a"));
    }
    directory.insert(IsolateDescriptor::new("forker-a", FORKER_KIND).on_node("node-a"));
    directory.insert(IsolateDescriptor::new("remote", "native").on_node("node-b"));
    directory.insert(IsolateDescriptor::new("floating", "native"));
    for name in ["iso1", "iso2", "iso3", "monitor", "forker-a", "remote"] {
        directory.set_condition(name, IsolateCondition::Running);
    }
    directory
}

fn config(stop_timeout: Duration) -> MonitorConfig {
    MonitorConfig {
        monitor_isolate: "monitor".to_string(),
        forker_isolate: "forker-a".to_string(),
        stop_timeout,
        restart_timeout: Duration::from_millis(500),
        signal_timeout: Duration::from_millis(500),
    }
}

async fn fixture(stop_timeout: Duration, result: StartResult) -> Fixture {
    let hub = LocalSignalHub::new(Duration::from_millis(500));
    let bus = Arc::new(hub.connect("monitor", "node-a", EndpointRole::Monitor).await);
    let forker = FakeForker::new(result);
    let forker_stopped = Arc::new(StopFlag::default());

    let coordinator = Arc::new(
        MonitorCoordinator::new(config(stop_timeout), bus.clone(), forker.clone(), directory())
            .with_forker_stop_handler(forker_stopped.clone()),
    );

    Fixture {
        hub,
        bus,
        forker,
        coordinator,
        forker_stopped,
    }
}

fn status(isolate: &str, stamp: i64, state: IsolateState) -> Option<IsolateStatusEvent> {
    Some(IsolateStatusEvent::new(isolate, stamp, state))
}

#[tokio::test]
async fn test_out_of_order_stamps_are_dropped() {
    let f = fixture(Duration::from_secs(1), StartResult::Success).await;

    let mut outcomes = Vec::new();
    for stamp in [5, 3, 5, 7] {
        outcomes.push(
            f.coordinator
                .handle_isolate_status("iso1", status("iso1", stamp, IsolateState::Alive))
                .await,
        );
    }

    assert_eq!(
        outcomes,
        vec![
            StatusOutcome::Accepted,
            StatusOutcome::Obsolete,
            StatusOutcome::Obsolete,
            StatusOutcome::Accepted,
        ]
    );
}

#[tokio::test]
async fn test_stamps_tracked_per_isolate() {
    let f = fixture(Duration::from_secs(1), StartResult::Success).await;

    let a = f
        .coordinator
        .handle_isolate_status("iso1", status("iso1", 10, IsolateState::Alive))
        .await;
    let b = f
        .coordinator
        .handle_isolate_status("iso2", status("iso2", 1, IsolateState::Alive))
        .await;
    assert_eq!((a, b), (StatusOutcome::Accepted, StatusOutcome::Accepted));
}

#[tokio::test]
async fn test_clean_stops_release_barrier() {
    let f = fixture(Duration::from_secs(2), StartResult::Success).await;

    let stop = f.coordinator.stop_platform().await.unwrap();
    assert!(f.forker.stopping.load(Ordering::SeqCst));
    assert_eq!(f.coordinator.pending_stop(), vec!["iso1", "iso2", "iso3", "remote"]);

    for (i, isolate) in ["iso1", "iso2", "iso3", "remote"].iter().enumerate() {
        f.coordinator
            .handle_isolate_status(isolate, status(isolate, i as i64 + 1, IsolateState::RuntimeStopped))
            .await;
    }

    let report = tokio::time::timeout(Duration::from_secs(1), stop)
        .await
        .expect("barrier should release before the stop timeout")
        .unwrap();
    assert!(report.graceful);
    assert!(report.forced.is_empty());
    assert!(f.forker.stops().is_empty());
    assert!(f.forker_stopped.0.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_stopping_and_stopped_count_once() {
    let f = fixture(Duration::from_millis(200), StartResult::Success).await;
    let stop = f.coordinator.stop_platform().await.unwrap();

    // Both phases from one isolate must not release the barrier early.
    f.coordinator
        .handle_isolate_status("iso1", status("iso1", 1, IsolateState::RuntimeStopping))
        .await;
    f.coordinator
        .handle_isolate_status("iso1", status("iso1", 2, IsolateState::RuntimeStopped))
        .await;

    let report = stop.await.unwrap();
    assert!(!report.graceful);
    assert_eq!(report.forced, vec!["iso2", "iso3", "remote"]);
}

#[tokio::test]
async fn test_timeout_forces_remaining_isolates() {
    let f = fixture(Duration::from_millis(100), StartResult::Success).await;

    let stop = f.coordinator.stop_platform().await.unwrap();
    for isolate in ["iso1", "iso2", "remote"] {
        f.coordinator
            .handle_isolate_status(isolate, status(isolate, 1, IsolateState::RuntimeStopping))
            .await;
    }

    let report = stop.await.unwrap();
    assert!(!report.graceful);
    assert_eq!(report.forced, vec!["iso3".to_string()]);
    assert_eq!(f.forker.stops(), vec!["iso3".to_string()]);
    assert!(f.forker_stopped.0.load(Ordering::SeqCst));
    assert!(f.coordinator.pending_stop().is_empty());
}

#[tokio::test]
async fn test_stop_signals_reach_isolates_and_monitor_last() {
    let f = fixture(Duration::from_millis(100), StartResult::Success).await;

    let iso1 = f.hub.connect("iso1", "node-a", EndpointRole::Isolate).await;
    let iso1_seen = Arc::new(Recorder::default());
    iso1.register_listener(names::ISOLATE_STOP, iso1_seen.clone())
        .await;

    let peer = f.hub.connect("monitor-b", "node-b", EndpointRole::Monitor).await;
    let peer_seen = Arc::new(Recorder::default());
    peer.register_listener(names::MONITOR_STOP_PLATFORM, peer_seen.clone())
        .await;

    let own_seen = Arc::new(Recorder::default());
    f.bus
        .register_listener(names::ISOLATE_STOP, own_seen.clone())
        .await;

    let stop = f.coordinator.stop_platform().await.unwrap();
    assert_eq!(iso1_seen.seen().len(), 1);
    assert_eq!(peer_seen.seen().len(), 1);
    assert!(own_seen.seen().is_empty());

    stop.await.unwrap();
    assert_eq!(own_seen.seen().len(), 1);
}

#[tokio::test]
async fn test_only_running_isolates_hold_the_barrier() {
    let f = fixture(Duration::from_millis(800), StartResult::Success).await;

    // Already down before the stop: iso2 stopped, iso3 lost.
    f.coordinator
        .handle_isolate_status("iso2", status("iso2", 1, IsolateState::RuntimeStopped))
        .await;
    f.coordinator.note_isolate_lost("iso3").await;

    let started = std::time::Instant::now();
    let stop = f.coordinator.stop_platform().await.unwrap();
    assert_eq!(f.coordinator.pending_stop(), vec!["iso1", "remote"]);

    for isolate in ["iso1", "remote"] {
        f.coordinator
            .handle_isolate_status(isolate, status(isolate, 1, IsolateState::RuntimeStopped))
            .await;
    }

    let report = stop.await.unwrap();
    assert!(report.graceful);
    assert!(report.forced.is_empty());
    assert!(started.elapsed() < Duration::from_millis(800));
}

#[tokio::test]
async fn test_nothing_running_stops_immediately() {
    let hub = LocalSignalHub::new(Duration::from_millis(500));
    let bus = Arc::new(hub.connect("monitor", "node-a", EndpointRole::Monitor).await);
    let mut planned = IsolateDirectory::new();
    planned.insert(IsolateDescriptor::new("iso1", "native").on_node("node-a"));
    let coordinator = Arc::new(MonitorCoordinator::new(
        config(Duration::from_secs(5)),
        bus,
        FakeForker::new(StartResult::Success),
        planned,
    ));

    let report = tokio::time::timeout(
        Duration::from_secs(1),
        coordinator.stop_platform().await.unwrap(),
    )
    .await
    .expect("no isolate to wait for")
    .unwrap();
    assert!(report.graceful);
    assert!(report.forced.is_empty());
}

#[tokio::test]
async fn test_stop_platform_is_not_reentrant() {
    let f = fixture(Duration::from_millis(100), StartResult::Success).await;

    let first = f.coordinator.stop_platform().await.unwrap();
    let second = f.coordinator.stop_platform().await;
    assert!(matches!(second, Err(MonitorError::StopInProgress)));

    first.await.unwrap();
}

#[tokio::test]
async fn test_start_refused_while_stopping() {
    let f = fixture(Duration::from_millis(50), StartResult::Success).await;

    f.coordinator.stop_platform().await.unwrap().await.unwrap();
    assert!(!f.coordinator.is_running());
    assert!(!f.coordinator.start_isolate("iso1").await);
    assert!(f.forker.starts().is_empty());
}

#[tokio::test]
async fn test_start_isolate_outcomes() {
    let f = fixture(Duration::from_secs(1), StartResult::AlreadyRunning).await;
    assert!(f.coordinator.start_isolate("iso1").await);
    assert_eq!(
        f.coordinator.directory().await.condition("iso1"),
        Some(IsolateCondition::Running)
    );

    // Fails closed without a node, and for unknown isolates.
    assert!(!f.coordinator.start_isolate("floating").await);
    assert!(!f.coordinator.start_isolate("ghost").await);
    assert_eq!(f.forker.starts(), vec!["iso1".to_string()]);

    let f = fixture(Duration::from_secs(1), StartResult::RunnerException).await;
    assert!(!f.coordinator.start_isolate("iso1").await);
    assert_eq!(f.forker.starts(), vec!["iso1".to_string()]);
}

#[tokio::test]
async fn test_failure_broadcasts_lost_and_restarts() {
    let f = fixture(Duration::from_secs(1), StartResult::Success).await;
    let peer = f.hub.connect("observer", "node-a", EndpointRole::Isolate).await;
    let lost = Arc::new(Recorder::default());
    peer.register_listener(names::ISOLATE_LOST, lost.clone()).await;

    let uid_before = f.coordinator.directory().await.get("iso2").unwrap().uid;
    let outcome = f
        .coordinator
        .handle_isolate_status("iso2", status("iso2", 1, IsolateState::Failure))
        .await;
    assert_eq!(outcome, StatusOutcome::Accepted);

    assert_eq!(
        lost.seen(),
        vec![(names::ISOLATE_LOST.to_string(), Value::from("iso2"))]
    );
    assert_eq!(f.forker.stops(), vec!["iso2".to_string()]);
    assert_eq!(f.forker.starts(), vec!["iso2".to_string()]);

    let directory = f.coordinator.directory().await;
    assert_ne!(directory.get("iso2").unwrap().uid, uid_before);
    assert_eq!(directory.condition("iso2"), Some(IsolateCondition::Running));
}

#[tokio::test]
async fn test_contact_lost_is_a_failure() {
    let f = fixture(Duration::from_secs(1), StartResult::Success).await;

    let outcome = f.coordinator.handle_isolate_status("iso3", None).await;
    assert_eq!(outcome, StatusOutcome::ContactLost);
    assert_eq!(f.forker.starts(), vec!["iso3".to_string()]);
}

#[tokio::test]
async fn test_restart_finding_old_process_is_a_failure() {
    let f = fixture(Duration::from_secs(1), StartResult::AlreadyRunning).await;

    f.coordinator
        .handle_isolate_status("iso1", status("iso1", 1, IsolateState::Failure))
        .await;
    assert_eq!(f.forker.starts(), vec!["iso1".to_string()]);
    assert_eq!(
        f.coordinator.directory().await.condition("iso1"),
        Some(IsolateCondition::Lost)
    );
}

/// Never goes down, whatever is asked.
struct UndeadForker(Arc<FakeForker>);

#[async_trait]
impl Forker for UndeadForker {
    async fn start_isolate(&self, descriptor: &IsolateDescriptor) -> StartResult {
        self.0.start_isolate(descriptor).await
    }

    async fn stop_isolate(&self, isolate: &str) {
        self.0.stop_isolate(isolate).await
    }

    async fn ping(&self, _isolate: &str) -> PingStatus {
        PingStatus::Stuck
    }

    fn is_on_node(&self, forker_id: &ForkerId, node: &str) -> bool {
        self.0.is_on_node(forker_id, node)
    }

    async fn set_platform_stopping(&self) {
        self.0.set_platform_stopping().await
    }

    fn node_name(&self) -> &str {
        "node-a"
    }
}

#[tokio::test]
async fn test_no_restart_while_old_process_lingers() {
    let hub = LocalSignalHub::new(Duration::from_millis(500));
    let bus = Arc::new(hub.connect("monitor", "node-a", EndpointRole::Monitor).await);
    let fake = FakeForker::new(StartResult::Success);
    let coordinator = Arc::new(MonitorCoordinator::new(
        config(Duration::from_secs(1)),
        bus,
        Arc::new(UndeadForker(fake.clone())),
        directory(),
    ));

    let uid_before = coordinator.directory().await.get("iso1").unwrap().uid;
    coordinator
        .handle_isolate_status("iso1", status("iso1", 1, IsolateState::Failure))
        .await;

    assert_eq!(fake.stops(), vec!["iso1".to_string()]);
    assert!(fake.starts().is_empty());
    let directory = coordinator.directory().await;
    assert_eq!(directory.get("iso1").unwrap().uid, uid_before);
    assert_eq!(directory.condition("iso1"), Some(IsolateCondition::Lost));
}

#[tokio::test]
async fn test_failed_forker_isolate_not_restarted() {
    let f = fixture(Duration::from_secs(1), StartResult::Success).await;

    f.coordinator.handle_isolate_status("forker-a", None).await;
    f.coordinator.handle_isolate_status("monitor", None).await;
    f.coordinator.handle_isolate_status("unknown", None).await;
    assert!(f.forker.starts().is_empty());
    assert_eq!(
        f.coordinator.directory().await.condition("forker-a"),
        Some(IsolateCondition::Lost)
    );
}

#[tokio::test]
async fn test_forker_registration_starts_node_isolates() {
    let f = fixture(Duration::from_secs(1), StartResult::Success).await;
    let record = ForkerRecord {
        forker_id: ForkerId::new(),
        node: "node-a".to_string(),
        host: "localhost".to_string(),
        isolate: "forker-a".to_string(),
    };

    let starts = f.coordinator.register_forker(record.clone()).await.unwrap();
    let outcomes = starts.await.unwrap();
    assert_eq!(
        outcomes,
        vec![
            ("iso1".to_string(), true),
            ("iso2".to_string(), true),
            ("iso3".to_string(), true),
        ]
    );

    // Same record again: nothing new to start.
    assert!(f.coordinator.register_forker(record).await.is_none());
}

#[tokio::test]
async fn test_forker_departure_declares_node_isolates_lost() {
    let f = fixture(Duration::from_secs(1), StartResult::Success).await;
    let peer = f.hub.connect("observer", "node-b", EndpointRole::Isolate).await;
    let lost = Arc::new(Recorder::default());
    peer.register_listener(names::ISOLATE_LOST, lost.clone()).await;

    let record = ForkerRecord {
        forker_id: ForkerId::new(),
        node: "node-b".to_string(),
        host: "10.0.0.2".to_string(),
        isolate: "forker-b".to_string(),
    };
    let id = record.forker_id;
    f.coordinator.register_forker(record).await.unwrap().await.unwrap();
    f.coordinator.unregister_forker(&id).await;

    assert_eq!(
        lost.seen(),
        vec![(names::ISOLATE_LOST.to_string(), Value::from("remote"))]
    );
    assert_eq!(
        f.coordinator.directory().await.condition("remote"),
        Some(IsolateCondition::Lost)
    );
}

#[tokio::test]
async fn test_listener_routes_signals() {
    let f = fixture(Duration::from_millis(50), StartResult::Success).await;
    MonitorSignalListener::register(f.coordinator.clone(), &*f.bus).await;

    let iso1 = f.hub.connect("iso1", "node-a", EndpointRole::Isolate).await;
    let event = IsolateStatusEvent::new("floating", 1, IsolateState::Alive).with_progress(1.0);
    iso1.fire_group(
        names::ISOLATE_STATUS,
        serde_json::to_value(&event).unwrap(),
        SignalGroup::Monitors,
    )
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        f.coordinator.directory().await.condition("floating"),
        Some(IsolateCondition::Running)
    );

    iso1.fire_group(names::ISOLATE_LOST, Value::from("iso2"), SignalGroup::Monitors)
        .await
        .unwrap();
    assert_eq!(
        f.coordinator.directory().await.condition("iso2"),
        Some(IsolateCondition::Lost)
    );

    let peer = f.hub.connect("monitor-b", "node-b", EndpointRole::Monitor).await;
    peer.fire(names::MONITOR_STOP_PLATFORM, Value::Null, "monitor")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!f.coordinator.is_running());
}
