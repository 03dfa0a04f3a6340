//! Pub/sub delivery through the fabric
//!
//! Covers broadcast delivery order, at-most-once per subscriber, and the
//! dead-letter diversion paths for backpressured and departed
//! subscribers.

use std::sync::Arc;

use weft::clock::ManualClock;
use weft::discovery::AgentRegistration;
use weft::domain_types::{AgentKind, AgentName, InstanceId, RoutingStrategy, TopicName};
use weft::router::{REASON_BACKPRESSURE, REASON_DEPARTED};
use weft::transport::{MsgType, Priority, RingTransport};
use weft::{Fabric, FabricConfig};

fn topic(name: &str) -> TopicName {
    TopicName::try_new(name.to_string()).unwrap()
}

fn agent_name(name: &str) -> AgentName {
    AgentName::try_new(name.to_string()).unwrap()
}

fn register(fabric: &Fabric, name: &str) -> (weft::domain_types::AgentId, Arc<RingTransport>) {
    let inbox = fabric.new_inbox();
    let id = fabric
        .discovery()
        .register(AgentRegistration {
            name: agent_name(name),
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
fn publish_reaches_every_subscriber_exactly_once() {
    let fabric = Fabric::with_clock(FabricConfig::testing(), Arc::new(ManualClock::new())).unwrap();
    let router = fabric.router();

    router
        .create_topic(topic("alerts"), RoutingStrategy::RoundRobin, false)
        .unwrap();

    let (a, a_inbox) = register(&fabric, "agent-a");
    let (b, b_inbox) = register(&fabric, "agent-b");
    router.subscribe(&topic("alerts"), a, agent_name("agent-a")).unwrap();
    router.subscribe(&topic("alerts"), b, agent_name("agent-b")).unwrap();

    let source = weft::domain_types::AgentId::new(1);
    let delivered = router
        .publish(&topic("alerts"), source, b"hi", Priority::Normal)
        .unwrap();
    assert_eq!(delivered, 2);

    for inbox in [&a_inbox, &b_inbox] {
        let frame = inbox.try_read(Priority::Normal).unwrap().unwrap();
        assert_eq!(frame.header.msg_type(), Some(MsgType::Publish));
        assert_eq!(frame.header.topic(), "alerts");
        assert_eq!(frame.payload.as_ref(), b"hi");
        assert_eq!(frame.header.source(), source);
        // Exactly one frame per subscriber per publish.
        assert!(inbox.try_read(Priority::Normal).unwrap().is_none());
    }
}

#[test]
fn duplicate_subscription_short_circuits_to_ok() {
    let fabric = Fabric::with_clock(FabricConfig::testing(), Arc::new(ManualClock::new())).unwrap();
    let router = fabric.router();
    router
        .create_topic(topic("alerts"), RoutingStrategy::RoundRobin, false)
        .unwrap();
    let (a, inbox) = register(&fabric, "agent-a");
    router.subscribe(&topic("alerts"), a, agent_name("agent-a")).unwrap();
    router.subscribe(&topic("alerts"), a, agent_name("agent-a")).unwrap();

    let delivered = router
        .publish(&topic("alerts"), weft::domain_types::AgentId::new(1), b"x", Priority::Normal)
        .unwrap();
    assert_eq!(delivered, 1, "double subscription must not double delivery");
    inbox.try_read(Priority::Normal).unwrap().unwrap();
    assert!(inbox.try_read(Priority::Normal).unwrap().is_none());
}

#[test]
fn create_topic_is_idempotent_on_matching_parameters() {
    let fabric = Fabric::with_clock(FabricConfig::testing(), Arc::new(ManualClock::new())).unwrap();
    let router = fabric.router();
    router
        .create_topic(topic("alerts"), RoutingStrategy::LeastLoaded, true)
        .unwrap();
    router
        .create_topic(topic("alerts"), RoutingStrategy::LeastLoaded, true)
        .unwrap();
    assert!(matches!(
        router.create_topic(topic("alerts"), RoutingStrategy::Random, true),
        Err(weft::RouterError::TopicExists { .. })
    ));
}

#[test]
fn backpressured_subscriber_diverts_to_dlq_without_affecting_others() {
    let clock = Arc::new(ManualClock::new());
    let fabric = Fabric::with_clock(FabricConfig::testing(), clock.clone()).unwrap();
    let router = fabric.router();
    router
        .create_topic(topic("alerts"), RoutingStrategy::RoundRobin, false)
        .unwrap();

    // A deliberately tiny inbox for the first subscriber.
    let cramped: Arc<RingTransport> = Arc::new(RingTransport::new(2, 1024, clock.clone()));
    let full_id = fabric
        .discovery()
        .register(AgentRegistration {
            name: agent_name("cramped"),
            kind: AgentKind::Monitor,
            instance: InstanceId::generate(),
            capabilities: Vec::new(),
            endpoints: Vec::new(),
            inbox: Arc::clone(&cramped),
        })
        .unwrap();
    let (roomy_id, roomy_inbox) = register(&fabric, "roomy");

    router.subscribe(&topic("alerts"), full_id, agent_name("cramped")).unwrap();
    router.subscribe(&topic("alerts"), roomy_id, agent_name("roomy")).unwrap();

    // Fill both slots of the cramped inbox.
    let source = weft::domain_types::AgentId::new(1);
    router.publish(&topic("alerts"), source, b"fill-1", Priority::Normal).unwrap();
    router.publish(&topic("alerts"), source, b"fill-2", Priority::Normal).unwrap();

    let delivered = router
        .publish(&topic("alerts"), source, b"overflow", Priority::Normal)
        .unwrap();
    assert_eq!(delivered, 1, "only the roomy subscriber takes the third frame");

    let letters = router.dead_letters();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].intended, full_id);
    assert_eq!(letters[0].reason, REASON_BACKPRESSURE);
    assert_eq!(letters[0].payload.as_ref(), b"overflow");

    // The roomy subscriber got all three.
    let mut count = 0;
    while roomy_inbox.try_read(Priority::Normal).unwrap().is_some() {
        count += 1;
    }
    assert_eq!(count, 3);
}

#[test]
fn departed_subscriber_is_detected_lazily() {
    let fabric = Fabric::with_clock(FabricConfig::testing(), Arc::new(ManualClock::new())).unwrap();
    let router = fabric.router();
    router
        .create_topic(topic("alerts"), RoutingStrategy::RoundRobin, false)
        .unwrap();

    let inbox = fabric.new_inbox();
    let registration_name = agent_name("ghost");
    let instance = InstanceId::generate();
    let ghost = fabric
        .discovery()
        .register(AgentRegistration {
            name: registration_name.clone(),
            kind: AgentKind::Monitor,
            instance,
            capabilities: Vec::new(),
            endpoints: Vec::new(),
            inbox,
        })
        .unwrap();
    router.subscribe(&topic("alerts"), ghost, registration_name.clone()).unwrap();

    // The agent leaves; its subscription record remains.
    fabric.discovery().unregister(&registration_name, instance).unwrap();

    let delivered = router
        .publish(&topic("alerts"), weft::domain_types::AgentId::new(1), b"gone", Priority::Normal)
        .unwrap();
    assert_eq!(delivered, 0);
    let letters = router.dead_letters();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].reason, REASON_DEPARTED);
}

#[test]
fn subscriber_counters_track_deliveries() {
    let fabric = Fabric::with_clock(FabricConfig::testing(), Arc::new(ManualClock::new())).unwrap();
    let router = fabric.router();
    router
        .create_topic(topic("alerts"), RoutingStrategy::RoundRobin, false)
        .unwrap();
    let (a, _inbox) = register(&fabric, "agent-a");
    router.subscribe(&topic("alerts"), a, agent_name("agent-a")).unwrap();

    for _ in 0..3 {
        router
            .publish(&topic("alerts"), weft::domain_types::AgentId::new(1), b"x", Priority::Normal)
            .unwrap();
    }

    let subs = router.topic_subscribers(&topic("alerts")).unwrap();
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].messages_received, 3);
    assert!(subs[0].active);

    let stats = router.stats();
    assert_eq!(stats.published, 3);
    assert_eq!(stats.delivered, 3);
    assert_eq!(stats.topics, 1);
}
