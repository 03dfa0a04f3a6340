//! Agent harness lifecycle: spawn, traffic, drain, unregister
//!
//! These tests run on the real clock because the harness owns a polling
//! worker thread; timeouts are generous to stay robust on loaded CI.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use weft::discovery::AgentRegistration;
use weft::domain_types::{AgentId, AgentKind, AgentName, InstanceId, TopicName};
use weft::transport::{MsgType, Priority, RingTransport};
use weft::{AgentBehavior, AgentContext, AgentHarness, AgentSpec, Fabric, FabricConfig, Frame};

const WAIT: Duration = Duration::from_secs(2);

fn topic(name: &str) -> TopicName {
    TopicName::try_new(name.to_string()).unwrap()
}

/// Test double recording what the harness dispatched to it.
#[derive(Default)]
struct Recording {
    published: Vec<Vec<u8>>,
    work_items: Vec<Vec<u8>>,
    started: bool,
    shut_down: bool,
}

struct Echo {
    recording: Arc<Mutex<Recording>>,
}

impl AgentBehavior for Echo {
    fn on_start(&mut self, _ctx: &AgentContext) {
        self.recording.lock().unwrap().started = true;
    }

    fn on_publish(&mut self, _ctx: &AgentContext, frame: &Frame) {
        self.recording.lock().unwrap().published.push(frame.payload.to_vec());
    }

    fn on_request(&mut self, _ctx: &AgentContext, frame: &Frame) -> Option<Vec<u8>> {
        let mut response = frame.payload.to_vec();
        response.reverse();
        Some(response)
    }

    fn on_work_item(&mut self, _ctx: &AgentContext, frame: &Frame) {
        self.recording.lock().unwrap().work_items.push(frame.payload.to_vec());
    }

    fn on_shutdown(&mut self, _ctx: &AgentContext) {
        self.recording.lock().unwrap().shut_down = true;
    }
}

fn wait_until(what: &str, mut predicate: impl FnMut() -> bool) {
    let start = std::time::Instant::now();
    while start.elapsed() < WAIT {
        if predicate() {
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("timed out waiting for {what}");
}

fn register_client(fabric: &Fabric) -> (AgentId, Arc<RingTransport>) {
    let inbox = fabric.new_inbox();
    let id = fabric
        .discovery()
        .register(AgentRegistration {
            name: AgentName::try_new("client".to_string()).unwrap(),
            kind: AgentKind::Monitor,
            instance: InstanceId::generate(),
            capabilities: Vec::new(),
            endpoints: Vec::new(),
            inbox: Arc::clone(&inbox),
        })
        .unwrap();
    (id, inbox)
}

#[test]
fn harness_round_trips_publish_request_and_work() {
    let fabric = Fabric::new(FabricConfig::testing()).unwrap();
    let recording = Arc::new(Mutex::new(Recording::default()));

    let mut spec = AgentSpec::new("echo", AgentKind::Constructor).unwrap();
    spec.subscriptions.push(topic("events"));
    spec.worker_queues.push(topic("jobs"));
    let agent = AgentHarness::spawn(
        Arc::clone(&fabric),
        spec,
        Echo {
            recording: Arc::clone(&recording),
        },
    )
    .unwrap();

    let (client, client_inbox) = register_client(&fabric);
    wait_until("agent start", || recording.lock().unwrap().started);

    // Publish: the harness dispatches to on_publish.
    fabric
        .router()
        .publish(&topic("events"), client, b"announcement", Priority::Normal)
        .unwrap();
    wait_until("publish dispatch", || {
        !recording.lock().unwrap().published.is_empty()
    });
    assert_eq!(recording.lock().unwrap().published[0], b"announcement");

    // Request: on_request's return value comes back as a Response.
    fabric
        .router()
        .send_request(agent.agent_id(), client, b"abc", Duration::from_secs(2), Priority::Normal)
        .unwrap();
    let response = client_inbox.read(Priority::Normal, WAIT).unwrap().unwrap();
    assert_eq!(response.header.msg_type(), Some(MsgType::Response));
    assert_eq!(response.payload.as_ref(), b"cba");

    // Work item: dispatched to on_work_item, then acknowledged.
    let chosen = fabric
        .router()
        .distribute_work_item(&topic("jobs"), client, b"job-payload", Priority::Normal, None)
        .unwrap();
    assert_eq!(chosen, agent.agent_id());
    let ack = client_inbox.read(Priority::Normal, WAIT).unwrap().unwrap();
    assert_eq!(ack.header.msg_type(), Some(MsgType::WorkAck));
    assert_eq!(ack.header.source(), agent.agent_id());
    assert_eq!(recording.lock().unwrap().work_items[0], b"job-payload");

    // Shutdown drains, runs on_shutdown, and unregisters.
    let name = agent.name().clone();
    agent.shutdown();
    assert!(recording.lock().unwrap().shut_down);
    assert!(fabric.discovery().lookup_by_name(&name).is_none());

    fabric.shutdown();
}

#[test]
fn harness_heartbeats_keep_the_agent_healthy() {
    // Short heartbeat so the test observes at least one update quickly.
    let config = FabricConfig::builder()
        .heartbeat_interval(weft::domain_types::HeartbeatIntervalMs::try_new(100).unwrap())
        .sweep_interval(weft::domain_types::SweepIntervalMs::try_new(10).unwrap())
        .enable_maintenance(false)
        .build()
        .unwrap();
    let fabric = Fabric::new(config).unwrap();

    let spec = AgentSpec::new("steady", AgentKind::Monitor).unwrap();
    let agent = AgentHarness::spawn(
        Arc::clone(&fabric),
        spec,
        Echo {
            recording: Arc::new(Mutex::new(Recording::default())),
        },
    )
    .unwrap();

    let id = agent.agent_id();
    assert!(fabric.discovery().is_healthy(id));

    // After a few heartbeat periods the snapshot has been refreshed.
    let initial = fabric.discovery().lookup_by_id(id).unwrap().health.last_heartbeat_ns;
    wait_until("heartbeat refresh", || {
        fabric
            .discovery()
            .lookup_by_id(id)
            .is_some_and(|h| h.health.last_heartbeat_ns > initial)
    });
    assert!(fabric.discovery().is_healthy(id));

    agent.shutdown();
    fabric.shutdown();
}

#[test]
fn duplicate_agent_name_fails_spawn_cleanly() {
    let fabric = Fabric::new(FabricConfig::testing()).unwrap();
    let first = AgentHarness::spawn(
        Arc::clone(&fabric),
        AgentSpec::new("dup", AgentKind::Monitor).unwrap(),
        Echo {
            recording: Arc::new(Mutex::new(Recording::default())),
        },
    )
    .unwrap();

    let second = AgentHarness::spawn(
        Arc::clone(&fabric),
        AgentSpec::new("dup", AgentKind::Monitor).unwrap(),
        Echo {
            recording: Arc::new(Mutex::new(Recording::default())),
        },
    );
    assert!(second.is_err());

    first.shutdown();
    fabric.shutdown();
}
