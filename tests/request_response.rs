//! Request/response correlation and the timeout sweep

use std::sync::Arc;
use std::time::Duration;

use weft::clock::ManualClock;
use weft::discovery::AgentRegistration;
use weft::domain_types::{AgentId, AgentKind, AgentName, InstanceId};
use weft::router::DeadLetterNotice;
use weft::transport::{FrameFlags, MsgType, Priority, RingTransport};
use weft::{Fabric, FabricConfig, RouterError};

fn register(fabric: &Fabric, name: &str) -> (AgentId, Arc<RingTransport>) {
    let inbox = fabric.new_inbox();
    let id = fabric
        .discovery()
        .register(AgentRegistration {
            name: AgentName::try_new(name.to_string()).unwrap(),
            kind: AgentKind::Constructor,
            instance: InstanceId::generate(),
            capabilities: Vec::new(),
            endpoints: Vec::new(),
            inbox: Arc::clone(&inbox),
        })
        .unwrap();
    (id, inbox)
}

#[test]
fn request_response_round_trip() {
    let clock = Arc::new(ManualClock::new());
    let fabric = Fabric::with_clock(FabricConfig::testing(), clock).unwrap();
    let router = fabric.router();

    let (client, client_inbox) = register(&fabric, "client");
    let (server, server_inbox) = register(&fabric, "server");

    let correlation = router
        .send_request(server, client, b"ping", Duration::from_secs(1), Priority::Normal)
        .unwrap();

    // The server sees a Request frame carrying the correlation id.
    let request = server_inbox.try_read(Priority::Normal).unwrap().unwrap();
    assert_eq!(request.header.msg_type(), Some(MsgType::Request));
    assert_eq!(request.header.correlation(), correlation);
    assert_eq!(request.payload.as_ref(), b"ping");
    assert!(request.header.flags().contains(FrameFlags::RESPONSE_EXPECTED));

    router.send_response(correlation, b"pong").unwrap();

    // The pending record is completed before any sweep runs.
    let pending = router.pending_request(correlation).unwrap();
    assert!(pending.completed);
    assert_eq!(pending.requester, client);
    assert_eq!(pending.target, server);

    let response = client_inbox.try_read(Priority::Normal).unwrap().unwrap();
    assert_eq!(response.header.msg_type(), Some(MsgType::Response));
    assert_eq!(response.header.correlation(), correlation);
    assert_eq!(response.payload.as_ref(), b"pong");
}

#[test]
fn second_response_for_same_correlation_is_rejected() {
    let clock = Arc::new(ManualClock::new());
    let fabric = Fabric::with_clock(FabricConfig::testing(), clock).unwrap();
    let router = fabric.router();
    let (client, _client_inbox) = register(&fabric, "client");
    let (server, _server_inbox) = register(&fabric, "server");

    let correlation = router
        .send_request(server, client, b"ping", Duration::from_secs(1), Priority::Normal)
        .unwrap();
    router.send_response(correlation, b"pong").unwrap();
    assert!(matches!(
        router.send_response(correlation, b"pong-again"),
        Err(RouterError::PendingNotFound { .. })
    ));
}

#[test]
fn correlation_ids_are_monotonic_and_unique_while_outstanding() {
    let clock = Arc::new(ManualClock::new());
    let fabric = Fabric::with_clock(FabricConfig::testing(), clock).unwrap();
    let router = fabric.router();
    let (client, _client_inbox) = register(&fabric, "client");
    let (server, _server_inbox) = register(&fabric, "server");

    let mut previous = None;
    for _ in 0..16 {
        let c = router
            .send_request(server, client, b"r", Duration::from_secs(1), Priority::Normal)
            .unwrap();
        if let Some(p) = previous {
            assert!(c > p, "correlation ids must be monotonic: {p} then {c}");
        }
        previous = Some(c);
    }
}

#[test]
fn timed_out_request_dead_letters_to_the_requester() {
    let clock = Arc::new(ManualClock::new());
    let fabric = Fabric::with_clock(FabricConfig::testing(), clock.clone()).unwrap();
    let router = fabric.router();
    let (client, client_inbox) = register(&fabric, "client");

    // Target 99 is not registered anywhere.
    let unknown = AgentId::new(99);
    let correlation = router
        .send_request(unknown, client, b"x", Duration::from_millis(50), Priority::Normal)
        .unwrap();

    // Before the deadline the sweep leaves the request alone.
    clock.advance(Duration::from_millis(49));
    assert_eq!(router.sweep_pending(), 0);
    assert!(!router.pending_request(correlation).unwrap().completed);

    clock.advance(Duration::from_millis(1));
    assert_eq!(router.sweep_pending(), 1);
    // Timed-out entries are completed and then collected.
    assert!(router.pending_request(correlation).is_none());

    let letter = client_inbox.try_read(Priority::Normal).unwrap().unwrap();
    assert_eq!(letter.header.msg_type(), Some(MsgType::DeadLetter));
    assert_eq!(letter.header.correlation(), correlation);
    let notice: DeadLetterNotice = serde_json::from_slice(&letter.payload).unwrap();
    assert_eq!(notice.reason, "timeout");
    assert_eq!(notice.original_target, 99);
    assert_eq!(notice.correlation_id, correlation.as_u32());

    assert_eq!(router.stats().timeouts, 1);
}

#[test]
fn request_to_full_inbox_rejects_back_to_caller() {
    let clock = Arc::new(ManualClock::new());
    let fabric = Fabric::with_clock(FabricConfig::testing(), clock.clone()).unwrap();
    let router = fabric.router();
    let (client, _client_inbox) = register(&fabric, "client");

    let cramped: Arc<RingTransport> = Arc::new(RingTransport::new(2, 1024, clock.clone()));
    let server = fabric
        .discovery()
        .register(AgentRegistration {
            name: AgentName::try_new("cramped-server".to_string()).unwrap(),
            kind: AgentKind::Constructor,
            instance: InstanceId::generate(),
            capabilities: Vec::new(),
            endpoints: Vec::new(),
            inbox: Arc::clone(&cramped),
        })
        .unwrap();

    router
        .send_request(server, client, b"1", Duration::from_secs(1), Priority::Normal)
        .unwrap();
    router
        .send_request(server, client, b"2", Duration::from_secs(1), Priority::Normal)
        .unwrap();
    let rejected = router.send_request(server, client, b"3", Duration::from_secs(1), Priority::Normal);
    assert!(matches!(rejected, Err(RouterError::Transport { .. })));

    // The withdrawn request leaves no pending record behind.
    assert_eq!(router.stats().pending, 2);
}

#[test]
fn zero_ttl_requests_are_rejected_as_invalid() {
    let clock = Arc::new(ManualClock::new());
    let fabric = Fabric::with_clock(FabricConfig::testing(), clock).unwrap();
    let router = fabric.router();
    let (client, _inbox) = register(&fabric, "client");
    assert!(matches!(
        router.send_request(AgentId::new(5), client, b"x", Duration::ZERO, Priority::Normal),
        Err(RouterError::InvalidArgument { field: "ttl", .. })
    ));
}
