//! Agent harness
//!
//! The small runtime every agent embeds: register with discovery, attach
//! an inbox, subscribe to topics, run the event loop on an owned worker
//! thread, heartbeat, and on shutdown drain with a deadline. Frames that
//! cannot be processed before the deadline are dead-lettered with reason
//! `"shutdown"`.
//!
//! The harness translates frames into typed callbacks and never
//! interprets payloads. Handlers are cooperative: there is no mechanism
//! to kill one mid-flight.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::domain_types::{
    AgentId, AgentKind, AgentName, Capability, Endpoint, HealthSnapshot, InstanceId,
    LifecycleState, LoadFactor, RoutingStrategy, TopicName,
};
use crate::discovery::AgentRegistration;
use crate::error::{FabricError, RouterError, TransportError};
use crate::fabric::Fabric;
use crate::router::REASON_SHUTDOWN;
use crate::transport::{Frame, MsgType, Priority, RingTransport};
use crate::vector::CpuClass;

/// Poll period of the event loop; bounds shutdown latency.
const LOOP_POLL: Duration = Duration::from_millis(1);

/// Per-message-class callbacks an agent supplies.
///
/// Default implementations ignore the frame, so an agent implements only
/// the classes it cares about.
pub trait AgentBehavior: Send + 'static {
    /// Called once on the worker thread before the first frame.
    fn on_start(&mut self, ctx: &AgentContext) {
        let _ = ctx;
    }

    /// A broadcast frame arrived.
    fn on_publish(&mut self, ctx: &AgentContext, frame: &Frame) {
        let _ = (ctx, frame);
    }

    /// A correlated request arrived. Returning a payload sends the
    /// response automatically.
    fn on_request(&mut self, ctx: &AgentContext, frame: &Frame) -> Option<Vec<u8>> {
        let _ = (ctx, frame);
        None
    }

    /// A work item arrived; the harness acknowledges it afterwards.
    fn on_work_item(&mut self, ctx: &AgentContext, frame: &Frame) {
        let _ = (ctx, frame);
    }

    /// A response to one of this agent's requests arrived.
    fn on_response(&mut self, ctx: &AgentContext, frame: &Frame) {
        let _ = (ctx, frame);
    }

    /// A dead-letter notification arrived (for example a request that
    /// timed out).
    fn on_dead_letter(&mut self, ctx: &AgentContext, frame: &Frame) {
        let _ = (ctx, frame);
    }

    /// Called once on the worker thread after the drain completes.
    fn on_shutdown(&mut self, ctx: &AgentContext) {
        let _ = ctx;
    }
}

/// Identity and fabric access handed to callbacks.
#[derive(Debug, Clone)]
pub struct AgentContext {
    fabric: Arc<Fabric>,
    agent_id: AgentId,
    name: AgentName,
}

impl AgentContext {
    /// This agent's routing id.
    #[must_use]
    pub fn agent_id(&self) -> AgentId {
        self.agent_id
    }

    /// This agent's name.
    #[must_use]
    pub fn name(&self) -> &AgentName {
        &self.name
    }

    /// The fabric handle.
    #[must_use]
    pub fn fabric(&self) -> &Arc<Fabric> {
        &self.fabric
    }

    /// Publishes on a topic as this agent.
    ///
    /// # Errors
    ///
    /// See [`crate::router::Router::publish`].
    pub fn publish(
        &self,
        topic: &TopicName,
        payload: &[u8],
        priority: Priority,
    ) -> Result<usize, RouterError> {
        self.fabric
            .router()
            .publish(topic, self.agent_id, payload, priority)
    }

    /// Sends a correlated request as this agent.
    ///
    /// # Errors
    ///
    /// See [`crate::router::Router::send_request`].
    pub fn send_request(
        &self,
        target: AgentId,
        payload: &[u8],
        ttl: Duration,
        priority: Priority,
    ) -> Result<crate::domain_types::CorrelationId, RouterError> {
        self.fabric
            .router()
            .send_request(target, self.agent_id, payload, ttl, priority)
    }
}

/// Declarative agent description consumed by [`AgentHarness::spawn`].
#[derive(Debug)]
pub struct AgentSpec {
    /// Unique agent name.
    pub name: AgentName,
    /// Specialization tag.
    pub kind: AgentKind,
    /// Advertised capabilities.
    pub capabilities: Vec<Capability>,
    /// Endpoint descriptors.
    pub endpoints: Vec<Endpoint>,
    /// Topics to subscribe to; missing topics are created with
    /// round-robin, non-persistent defaults.
    pub subscriptions: Vec<TopicName>,
    /// Work queues to join as a worker; missing queues are created with
    /// the round-robin strategy.
    pub worker_queues: Vec<TopicName>,
    /// CPU class to pin the worker thread to, if affinity is enabled.
    pub pin: Option<CpuClass>,
}

impl AgentSpec {
    /// Minimal spec: a name and a kind.
    ///
    /// # Errors
    ///
    /// [`FabricError::Init`] when the name fails validation.
    pub fn new(name: &str, kind: AgentKind) -> Result<Self, FabricError> {
        let name = AgentName::try_new(name.to_string()).map_err(|e| FabricError::Init {
            message: format!("bad agent name: {e}"),
        })?;
        Ok(Self {
            name,
            kind,
            capabilities: Vec::new(),
            endpoints: Vec::new(),
            subscriptions: Vec::new(),
            worker_queues: Vec::new(),
            pin: None,
        })
    }
}

/// A running agent: identity, inbox, and the owned worker thread.
pub struct AgentHarness {
    agent_id: AgentId,
    name: AgentName,
    instance: InstanceId,
    inbox: Arc<RingTransport>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for AgentHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHarness")
            .field("agent_id", &self.agent_id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl AgentHarness {
    /// Registers the agent and starts its event loop.
    ///
    /// # Errors
    ///
    /// [`FabricError::Registry`] when registration fails,
    /// [`FabricError::Router`] when a subscription fails, and
    /// [`FabricError::Init`] when the worker thread cannot start. On
    /// any failure the partially-registered agent is removed again.
    pub fn spawn<B: AgentBehavior>(
        fabric: Arc<Fabric>,
        spec: AgentSpec,
        behavior: B,
    ) -> Result<Self, FabricError> {
        let inbox = fabric.new_inbox();
        let instance = InstanceId::generate();
        let agent_id = fabric.discovery().register(AgentRegistration {
            name: spec.name.clone(),
            kind: spec.kind,
            instance,
            capabilities: spec.capabilities.clone(),
            endpoints: spec.endpoints.clone(),
            inbox: Arc::clone(&inbox),
        })?;

        if let Err(e) = Self::attach(&fabric, &spec, agent_id) {
            let _ = fabric.discovery().unregister(&spec.name, instance);
            return Err(e);
        }

        let stop = Arc::new(AtomicBool::new(false));
        let ctx = AgentContext {
            fabric: Arc::clone(&fabric),
            agent_id,
            name: spec.name.clone(),
        };
        let thread = {
            let inbox = Arc::clone(&inbox);
            let stop = Arc::clone(&stop);
            let pin = spec.pin.filter(|_| fabric.config().enable_affinity);
            let name = spec.name.clone();
            std::thread::Builder::new()
                .name(format!("weft-agent-{name}"))
                .spawn(move || {
                    if let Some(class) = pin {
                        crate::vector::pin_current_thread(class);
                    }
                    run_event_loop(ctx, behavior, &inbox, &stop, instance);
                })
                .map_err(|e| {
                    let _ = fabric.discovery().unregister(&spec.name, instance);
                    FabricError::Init {
                        message: format!("cannot start agent thread: {e}"),
                    }
                })?
        };

        info!(%agent_id, name = %spec.name, "agent harness started");
        Ok(Self {
            agent_id,
            name: spec.name,
            instance,
            inbox,
            stop,
            thread: Some(thread),
        })
    }

    fn attach(fabric: &Arc<Fabric>, spec: &AgentSpec, agent_id: AgentId) -> Result<(), FabricError> {
        let router = fabric.router();
        for topic in &spec.subscriptions {
            match router.subscribe(topic, agent_id, spec.name.clone()) {
                Err(RouterError::TopicNotFound { .. }) => {
                    router.create_topic(topic.clone(), RoutingStrategy::RoundRobin, false)?;
                    router.subscribe(topic, agent_id, spec.name.clone())?;
                }
                other => other?,
            }
        }
        for queue in &spec.worker_queues {
            match router.register_worker(queue, agent_id, spec.name.clone()) {
                Err(RouterError::QueueNotFound { .. }) => {
                    router.create_work_queue(queue.clone(), RoutingStrategy::RoundRobin)?;
                    router.register_worker(queue, agent_id, spec.name.clone())?;
                }
                other => other?,
            }
        }
        Ok(())
    }

    /// This agent's routing id.
    #[must_use]
    pub fn agent_id(&self) -> AgentId {
        self.agent_id
    }

    /// This agent's name.
    #[must_use]
    pub fn name(&self) -> &AgentName {
        &self.name
    }

    /// This agent's registration epoch.
    #[must_use]
    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    /// The agent's inbox (tests and tooling).
    #[must_use]
    pub fn inbox(&self) -> &Arc<RingTransport> {
        &self.inbox
    }

    /// Stops the event loop, drains, and unregisters.
    ///
    /// Blocks until the worker thread exits; the drain itself is
    /// bounded by the configured deadline.
    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(agent_id = %self.agent_id, "agent thread panicked");
            }
        }
    }
}

impl Drop for AgentHarness {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            warn!(
                agent_id = %self.agent_id,
                "agent harness dropped without shutdown; stopping thread"
            );
            self.stop.store(true, Ordering::Release);
            let _ = thread.join();
        }
    }
}

fn run_event_loop<B: AgentBehavior>(
    ctx: AgentContext,
    mut behavior: B,
    inbox: &RingTransport,
    stop: &AtomicBool,
    instance: InstanceId,
) {
    let fabric = Arc::clone(ctx.fabric());
    let clock = fabric.clock().clone();
    let heartbeat_ns = fabric
        .config()
        .heartbeat_interval
        .as_u64()
        .saturating_mul(1_000_000);
    let ring_capacity =
        (fabric.config().ring_slots.as_usize() * Priority::COUNT).max(1) as f64;

    behavior.on_start(&ctx);

    let mut next_heartbeat = clock.monotonic_ns();
    let mut handled: u64 = 0;
    let mut handler_time_us: u64 = 0;

    while !stop.load(Ordering::Acquire) {
        match inbox.read_any(LOOP_POLL) {
            Ok(Some(frame)) => {
                let start = clock.monotonic_ns();
                dispatch(&ctx, &mut behavior, &frame);
                handled += 1;
                handler_time_us += clock.monotonic_ns().saturating_sub(start) / 1000;
            }
            Ok(None) | Err(TransportError::TimedOut { .. }) => {}
            Err(_) => break,
        }

        let now = clock.monotonic_ns();
        if now >= next_heartbeat {
            let depth = inbox.stats().depth();
            let snapshot = HealthSnapshot {
                last_heartbeat_ns: now,
                avg_response_us: if handled > 0 { handler_time_us / handled } else { 0 },
                load_factor: LoadFactor::try_new((depth as f64 / ring_capacity).clamp(0.0, 1.0))
                    .unwrap_or_default(),
                queue_depth: depth as u32,
                active_connections: 0,
                error_count: 0,
            };
            if fabric.discovery().update_health(ctx.agent_id(), snapshot).is_err() {
                // Unregistered out from under us; nothing left to serve.
                break;
            }
            next_heartbeat = now.saturating_add(heartbeat_ns);
        }
    }

    drain(&ctx, &mut behavior, inbox);
    behavior.on_shutdown(&ctx);
    let _ = fabric.discovery().unregister(ctx.name(), instance);
    debug!(agent_id = %ctx.agent_id(), "agent event loop exited");
}

fn drain<B: AgentBehavior>(ctx: &AgentContext, behavior: &mut B, inbox: &RingTransport) {
    let fabric = ctx.fabric();
    let clock = fabric.clock();
    let _ = fabric
        .discovery()
        .set_state(ctx.agent_id(), LifecycleState::ShuttingDown);
    inbox.close();

    let deadline = clock.monotonic_ns().saturating_add(
        fabric
            .config()
            .drain_deadline
            .as_duration()
            .as_nanos()
            .min(u128::from(u64::MAX)) as u64,
    );
    let mut dead_lettered = 0usize;
    loop {
        match inbox.try_read_any() {
            Ok(Some(frame)) => {
                if clock.monotonic_ns() < deadline {
                    dispatch(ctx, behavior, &frame);
                } else {
                    fabric
                        .router()
                        .dead_letter_frame(&frame, ctx.agent_id(), REASON_SHUTDOWN);
                    dead_lettered += 1;
                }
            }
            Ok(None) | Err(_) => break,
        }
    }
    if dead_lettered > 0 {
        warn!(
            agent_id = %ctx.agent_id(),
            dead_lettered,
            "drain deadline passed, remaining frames dead-lettered"
        );
    }
}

fn dispatch<B: AgentBehavior>(ctx: &AgentContext, behavior: &mut B, frame: &Frame) {
    match frame.header.msg_type() {
        Some(MsgType::Publish) => behavior.on_publish(ctx, frame),
        Some(MsgType::Request) => {
            if let Some(response) = behavior.on_request(ctx, frame) {
                let correlation = frame.header.correlation();
                if let Err(e) = ctx.fabric().router().send_response(correlation, &response) {
                    debug!(%correlation, error = %e, "response not deliverable");
                }
            }
        }
        Some(MsgType::WorkItem) => {
            behavior.on_work_item(ctx, frame);
            ctx.fabric()
                .router()
                .send_work_ack(ctx.agent_id(), &frame.header);
        }
        Some(MsgType::Response) => behavior.on_response(ctx, frame),
        Some(MsgType::DeadLetter) => behavior.on_dead_letter(ctx, frame),
        Some(
            MsgType::Subscribe | MsgType::Unsubscribe | MsgType::WorkAck | MsgType::Heartbeat,
        ) => {
            trace!(msg_type = ?frame.header.msg_type(), "control frame ignored");
        }
        None => {
            trace!("frame with unknown message type ignored");
        }
    }
}
