//! Agent discovery and health registry
//!
//! An in-process registry keyed by agent name with secondary indexes by
//! kind and by capability. Lookups are the hot path and run under a read
//! lock, wait-free relative to each other; registration and health
//! writes are serialized behind the write lock.
//!
//! The registry stores each agent's inbox transport handle so the router
//! can resolve a recipient by id without owning the agent's lifetime. A
//! departed agent is detected lazily when its id stops resolving.
//!
//! Lock order: the discovery lock is the outermost fabric lock; nothing
//! here acquires router or RBAC locks.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::clock::SharedClock;
use crate::domain_types::{
    AgentId, AgentKind, AgentName, Capability, CapabilityName, Endpoint, HealthSnapshot,
    HeartbeatIntervalMs, InstanceId, LifecycleState,
};
use crate::error::RegistryError;
use crate::transport::RingTransport;

/// Fixed registry capacity; registration past this returns
/// [`RegistryError::CapacityExceeded`].
pub const MAX_AGENTS: usize = 1024;

/// A heartbeat is stale after this many missed intervals.
const STALE_INTERVALS: u64 = 3;

/// Everything an agent declares when joining the fabric.
#[derive(Debug)]
pub struct AgentRegistration {
    /// Unique human-readable name.
    pub name: AgentName,
    /// Specialization tag.
    pub kind: AgentKind,
    /// Registration epoch; re-registrations mint a fresh one.
    pub instance: InstanceId,
    /// Advertised capabilities.
    pub capabilities: Vec<Capability>,
    /// Endpoint descriptors; immutable after registration.
    pub endpoints: Vec<Endpoint>,
    /// The agent's inbox. The agent owns the transport; the registry
    /// holds a reference for route resolution only.
    pub inbox: Arc<RingTransport>,
}

struct AgentRecord {
    id: AgentId,
    name: AgentName,
    kind: AgentKind,
    instance: InstanceId,
    capabilities: Vec<Capability>,
    endpoints: Vec<Endpoint>,
    inbox: Arc<RingTransport>,
    state: LifecycleState,
    health: HealthSnapshot,
}

/// Point-in-time view of a registered agent.
///
/// Cloned out of the registry at lookup; holding one does not pin
/// registry state, only the inbox transport.
#[derive(Debug, Clone)]
pub struct AgentHandle {
    /// Routing id.
    pub id: AgentId,
    /// Registered name.
    pub name: AgentName,
    /// Specialization tag.
    pub kind: AgentKind,
    /// Registration epoch.
    pub instance: InstanceId,
    /// Lifecycle state at lookup time.
    pub state: LifecycleState,
    /// Health snapshot at lookup time.
    pub health: HealthSnapshot,
    /// Advertised capabilities.
    pub capabilities: Vec<Capability>,
    /// Endpoint descriptors.
    pub endpoints: Vec<Endpoint>,
    inbox: Arc<RingTransport>,
}

impl AgentHandle {
    /// The agent's inbox transport.
    #[must_use]
    pub fn inbox(&self) -> &Arc<RingTransport> {
        &self.inbox
    }
}

#[derive(Default)]
struct Inner {
    by_id: HashMap<AgentId, AgentRecord>,
    by_name: HashMap<AgentName, AgentId>,
    // Secondary indexes keep insertion order for deterministic tie-breaks.
    by_kind: HashMap<AgentKind, Vec<AgentId>>,
    by_capability: HashMap<CapabilityName, Vec<AgentId>>,
}

/// The discovery registry.
pub struct Discovery {
    inner: RwLock<Inner>,
    next_id: AtomicU32,
    heartbeat_interval: HeartbeatIntervalMs,
    clock: SharedClock,
}

impl std::fmt::Debug for Discovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Discovery")
            .field("agents", &self.len())
            .field("heartbeat_interval", &self.heartbeat_interval)
            .finish()
    }
}

impl Discovery {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(heartbeat_interval: HeartbeatIntervalMs, clock: SharedClock) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            next_id: AtomicU32::new(1),
            heartbeat_interval,
            clock,
        }
    }

    /// Registers an agent and assigns its routing id.
    ///
    /// Ids are monotonic and never reused within a process lifetime.
    /// Registration counts as the first heartbeat and the agent enters
    /// `Active` directly; endpoints are immutable afterwards
    /// (unregister and re-register to change them).
    ///
    /// # Errors
    ///
    /// [`RegistryError::NameExists`] for a duplicate name,
    /// [`RegistryError::CapacityExceeded`] at [`MAX_AGENTS`] records.
    pub fn register(&self, registration: AgentRegistration) -> Result<AgentId, RegistryError> {
        let mut inner = self.inner.write();
        if inner.by_name.contains_key(&registration.name) {
            return Err(RegistryError::NameExists {
                name: registration.name,
            });
        }
        if inner.by_id.len() >= MAX_AGENTS {
            return Err(RegistryError::CapacityExceeded {
                capacity: MAX_AGENTS,
            });
        }

        let id = AgentId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let health = HealthSnapshot {
            last_heartbeat_ns: self.clock.monotonic_ns(),
            ..HealthSnapshot::default()
        };
        let record = AgentRecord {
            id,
            name: registration.name.clone(),
            kind: registration.kind,
            instance: registration.instance,
            capabilities: registration.capabilities,
            endpoints: registration.endpoints,
            inbox: registration.inbox,
            state: LifecycleState::Active,
            health,
        };

        inner.by_name.insert(registration.name.clone(), id);
        inner.by_kind.entry(registration.kind).or_default().push(id);
        for cap in &record.capabilities {
            inner
                .by_capability
                .entry(cap.name.clone())
                .or_default()
                .push(id);
        }
        inner.by_id.insert(id, record);
        info!(%id, name = %registration.name, kind = ?registration.kind, "agent registered");
        Ok(id)
    }

    /// Removes an agent by name, guarded by its instance id.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] when the name is unknown or the
    /// instance does not match (a successor already re-registered).
    pub fn unregister(&self, name: &AgentName, instance: InstanceId) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();
        let id = *inner.by_name.get(name).ok_or(RegistryError::NotFound)?;
        let matches = inner
            .by_id
            .get(&id)
            .is_some_and(|r| r.instance == instance);
        if !matches {
            return Err(RegistryError::NotFound);
        }

        let record = inner.by_id.remove(&id).ok_or(RegistryError::NotFound)?;
        inner.by_name.remove(name);
        if let Some(ids) = inner.by_kind.get_mut(&record.kind) {
            ids.retain(|i| *i != id);
        }
        for cap in &record.capabilities {
            if let Some(ids) = inner.by_capability.get_mut(&cap.name) {
                ids.retain(|i| *i != id);
            }
        }
        debug!(%id, %name, "agent unregistered");
        Ok(())
    }

    /// Looks up an agent by name.
    #[must_use]
    pub fn lookup_by_name(&self, name: &AgentName) -> Option<AgentHandle> {
        let inner = self.inner.read();
        let id = inner.by_name.get(name)?;
        inner.by_id.get(id).map(handle_of)
    }

    /// Looks up an agent by id.
    #[must_use]
    pub fn lookup_by_id(&self, id: AgentId) -> Option<AgentHandle> {
        let inner = self.inner.read();
        inner.by_id.get(&id).map(handle_of)
    }

    /// First healthy agent of the given kind.
    ///
    /// Ties break by lowest load factor, then by insertion order, so
    /// selection is deterministic under equal health.
    #[must_use]
    pub fn lookup_by_type(&self, kind: AgentKind) -> Option<AgentHandle> {
        let now = self.clock.monotonic_ns();
        let inner = self.inner.read();
        let ids = inner.by_kind.get(&kind)?;
        let mut best: Option<&AgentRecord> = None;
        for id in ids {
            let Some(record) = inner.by_id.get(id) else {
                continue;
            };
            if !self.record_is_healthy(record, now) {
                continue;
            }
            // Strict less-than keeps the earlier insertion on ties.
            let better = best.is_none_or(|b| {
                record.health.load_factor.as_f64() < b.health.load_factor.as_f64()
            });
            if better {
                best = Some(record);
            }
        }
        best.map(handle_of)
    }

    /// All agents advertising the capability, in no contractual order.
    #[must_use]
    pub fn lookup_by_capability(&self, capability: &CapabilityName) -> Vec<AgentHandle> {
        let inner = self.inner.read();
        inner
            .by_capability
            .get(capability)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.by_id.get(id))
                    .map(handle_of)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Resolves just the inbox for a recipient id.
    ///
    /// The router's per-frame path; avoids cloning the full handle.
    #[must_use]
    pub fn inbox(&self, id: AgentId) -> Option<Arc<RingTransport>> {
        let inner = self.inner.read();
        inner.by_id.get(&id).map(|r| Arc::clone(&r.inbox))
    }

    /// Atomically replaces an agent's health block.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] for an unknown id.
    pub fn update_health(
        &self,
        id: AgentId,
        snapshot: HealthSnapshot,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();
        let record = inner.by_id.get_mut(&id).ok_or(RegistryError::NotFound)?;
        record.health = snapshot;
        Ok(())
    }

    /// Transitions an agent's lifecycle state.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] for an unknown id.
    pub fn set_state(&self, id: AgentId, state: LifecycleState) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();
        let record = inner.by_id.get_mut(&id).ok_or(RegistryError::NotFound)?;
        record.state = state;
        debug!(%id, ?state, "agent state transition");
        Ok(())
    }

    /// Whether the agent accepts traffic and heartbeated recently.
    ///
    /// True iff the state is Active or Degraded and the last heartbeat is
    /// within three heartbeat intervals.
    #[must_use]
    pub fn is_healthy(&self, id: AgentId) -> bool {
        let now = self.clock.monotonic_ns();
        let inner = self.inner.read();
        inner
            .by_id
            .get(&id)
            .is_some_and(|r| self.record_is_healthy(r, now))
    }

    fn record_is_healthy(&self, record: &AgentRecord, now_ns: u64) -> bool {
        if !record.state.accepts_traffic() {
            return false;
        }
        let window = self
            .heartbeat_interval
            .as_u64()
            .saturating_mul(STALE_INTERVALS)
            .saturating_mul(1_000_000);
        record.health.last_heartbeat_ns >= now_ns.saturating_sub(window)
    }

    /// Number of registered agents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn handle_of(record: &AgentRecord) -> AgentHandle {
    AgentHandle {
        id: record.id,
        name: record.name.clone(),
        kind: record.kind,
        instance: record.instance,
        state: record.state,
        health: record.health,
        capabilities: record.capabilities.clone(),
        endpoints: record.endpoints.clone(),
        inbox: Arc::clone(&record.inbox),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::domain_types::LoadFactor;
    use std::time::Duration;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new())
    }

    fn discovery(clock: Arc<ManualClock>) -> Discovery {
        Discovery::new(HeartbeatIntervalMs::try_new(1000).unwrap(), clock)
    }

    fn registration(name: &str, kind: AgentKind, clock: &Arc<ManualClock>) -> AgentRegistration {
        AgentRegistration {
            name: AgentName::try_new(name.to_string()).unwrap(),
            kind,
            instance: InstanceId::generate(),
            capabilities: Vec::new(),
            endpoints: Vec::new(),
            inbox: Arc::new(RingTransport::new(16, 64 * 1024, clock.clone())),
        }
    }

    #[test]
    fn ids_are_monotonic_and_names_unique() {
        let clock = clock();
        let disco = discovery(clock.clone());
        let a = disco
            .register(registration("alpha", AgentKind::Monitor, &clock))
            .unwrap();
        let b = disco
            .register(registration("beta", AgentKind::Monitor, &clock))
            .unwrap();
        assert!(b > a);
        let err = disco
            .register(registration("alpha", AgentKind::Web, &clock))
            .unwrap_err();
        assert!(matches!(err, RegistryError::NameExists { .. }));
    }

    #[test]
    fn unregister_requires_matching_instance() {
        let clock = clock();
        let disco = discovery(clock.clone());
        let reg = registration("alpha", AgentKind::Monitor, &clock);
        let name = reg.name.clone();
        let instance = reg.instance;
        disco.register(reg).unwrap();
        assert!(matches!(
            disco.unregister(&name, InstanceId::generate()),
            Err(RegistryError::NotFound)
        ));
        disco.unregister(&name, instance).unwrap();
        assert!(disco.lookup_by_name(&name).is_none());
    }

    #[test]
    fn ids_are_not_reused_after_unregister() {
        let clock = clock();
        let disco = discovery(clock.clone());
        let reg = registration("alpha", AgentKind::Monitor, &clock);
        let name = reg.name.clone();
        let instance = reg.instance;
        let first = disco.register(reg).unwrap();
        disco.unregister(&name, instance).unwrap();
        let second = disco
            .register(registration("alpha", AgentKind::Monitor, &clock))
            .unwrap();
        assert!(second > first, "id reuse after unregister");
    }

    #[test]
    fn lookup_by_type_prefers_least_loaded_then_insertion_order() {
        let clock = clock();
        let disco = discovery(clock.clone());
        let first = disco
            .register(registration("w1", AgentKind::Constructor, &clock))
            .unwrap();
        let second = disco
            .register(registration("w2", AgentKind::Constructor, &clock))
            .unwrap();

        // Equal load: insertion order wins.
        assert_eq!(disco.lookup_by_type(AgentKind::Constructor).unwrap().id, first);

        disco
            .update_health(
                first,
                HealthSnapshot {
                    last_heartbeat_ns: clock.monotonic_ns(),
                    load_factor: LoadFactor::try_new(0.9).unwrap(),
                    ..HealthSnapshot::default()
                },
            )
            .unwrap();
        assert_eq!(disco.lookup_by_type(AgentKind::Constructor).unwrap().id, second);
    }

    #[test]
    fn stale_heartbeat_fails_health_check() {
        let clock = clock();
        let disco = discovery(clock.clone());
        let id = disco
            .register(registration("alpha", AgentKind::Monitor, &clock))
            .unwrap();
        assert!(disco.is_healthy(id));
        // Three intervals of 1000ms pass without a heartbeat.
        clock.advance(Duration::from_millis(3001));
        assert!(!disco.is_healthy(id));
        // A fresh heartbeat restores health.
        disco
            .update_health(
                id,
                HealthSnapshot {
                    last_heartbeat_ns: clock.monotonic_ns(),
                    ..HealthSnapshot::default()
                },
            )
            .unwrap();
        assert!(disco.is_healthy(id));
    }

    #[test]
    fn shutting_down_agents_are_unhealthy() {
        let clock = clock();
        let disco = discovery(clock.clone());
        let id = disco
            .register(registration("alpha", AgentKind::Monitor, &clock))
            .unwrap();
        disco.set_state(id, LifecycleState::ShuttingDown).unwrap();
        assert!(!disco.is_healthy(id));
    }

    #[test]
    fn capability_index_tracks_registration() {
        let clock = clock();
        let disco = discovery(clock.clone());
        let cap = Capability {
            name: CapabilityName::try_new("compile".to_string()).unwrap(),
            version: crate::domain_types::CapabilityVersion::try_new("1.0".to_string()).unwrap(),
            performance_rating: crate::domain_types::PerformanceRating::try_new(0.7).unwrap(),
            max_concurrent: crate::domain_types::MaxConcurrent::try_new(4).unwrap(),
        };
        let mut reg = registration("builder", AgentKind::Constructor, &clock);
        reg.capabilities.push(cap.clone());
        let name = reg.name.clone();
        let instance = reg.instance;
        let id = disco.register(reg).unwrap();

        let found = disco.lookup_by_capability(&cap.name);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, id);

        disco.unregister(&name, instance).unwrap();
        assert!(disco.lookup_by_capability(&cap.name).is_empty());
    }
}
