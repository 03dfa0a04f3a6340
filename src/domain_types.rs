//! Domain types for the weft message fabric
//!
//! Strongly-typed domain values shared by every subsystem, following a
//! newtype-per-scalar discipline to keep raw integers and strings out of
//! the public API.

use nutype::nutype;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Routing identity of an agent.
///
/// Assigned monotonically at registration and never reused within a
/// process lifetime. This is the id that appears in frame headers.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct AgentId(u32);

impl AgentId {
    /// Raw value for wire encoding.
    #[must_use]
    pub fn as_u32(&self) -> u32 {
        self.into_inner()
    }
}

/// Registration epoch of an agent.
///
/// A fresh instance id is minted per registration, so a re-registered
/// agent with the same name is distinguishable from its predecessor.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct InstanceId(Uuid);

impl InstanceId {
    /// Mints a new random instance id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Token linking a request to its response.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct CorrelationId(u32);

impl CorrelationId {
    /// Raw value for wire encoding.
    #[must_use]
    pub fn as_u32(&self) -> u32 {
        self.into_inner()
    }
}

/// Stable user identity in the RBAC store.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct UserId(u32);

/// Human-readable agent name, unique per registry.
#[nutype(
    validate(predicate = |name| {
        !name.is_empty() && name.len() <= 128 && name.bytes().all(|b| (0x20..0x7f).contains(&b))
    }),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, TryFrom, Into, AsRef, Deref)
)]
pub struct AgentName(String);

impl AgentName {
    /// Borrows the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self
    }
}

/// Topic or work-queue name.
///
/// At most 128 printable ASCII bytes so it fits the fixed topic field of
/// the frame header without truncation. Stored case-sensitive.
#[nutype(
    validate(predicate = |name| {
        !name.is_empty() && name.len() <= 128 && name.bytes().all(|b| (0x20..0x7f).contains(&b))
    }),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, TryFrom, Into, AsRef, Deref)
)]
pub struct TopicName(String);

impl TopicName {
    /// Borrows the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self
    }
}

/// Name of an advertised capability.
#[nutype(
    validate(predicate = |name| {
        !name.is_empty() && name.len() <= 64 && name.bytes().all(|b| (0x20..0x7f).contains(&b))
    }),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, TryFrom, Into, AsRef, Deref)
)]
pub struct CapabilityName(String);

impl CapabilityName {
    /// Borrows the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self
    }
}

/// Capability version string.
#[nutype(
    validate(predicate = |v| !v.is_empty() && v.len() <= 32),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, TryFrom, Into, AsRef, Deref)
)]
pub struct CapabilityVersion(String);

impl CapabilityVersion {
    /// Borrows the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self
    }
}

/// RBAC user name, at most 64 bytes.
#[nutype(
    sanitize(trim),
    validate(predicate = |name| !name.is_empty() && name.len() <= 64),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, TryFrom, Into, AsRef, Deref)
)]
pub struct UserName(String);

impl UserName {
    /// Borrows the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self
    }
}

/// Endpoint address, at most 64 bytes.
#[nutype(
    validate(predicate = |addr| !addr.is_empty() && addr.len() <= 64),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, TryFrom, Into, AsRef, Deref)
)]
pub struct EndpointAddress(String);

impl EndpointAddress {
    /// Borrows the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self
    }
}

/// Agent-reported load ratio in [0, 1].
///
/// Defined as `queue_depth / capacity`; the `LeastLoaded` routing
/// strategy compares it directly.
#[nutype(
    validate(greater_or_equal = 0.0, less_or_equal = 1.0),
    derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize, Display, Default, TryFrom, Into),
    default = 0.0
)]
pub struct LoadFactor(f64);

impl LoadFactor {
    /// Raw ratio.
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        self.into_inner()
    }
}

/// Capability performance rating in [0, 1].
#[nutype(
    validate(greater_or_equal = 0.0, less_or_equal = 1.0),
    derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize, Display, Default, TryFrom, Into),
    default = 0.5
)]
pub struct PerformanceRating(f64);

impl PerformanceRating {
    /// Raw rating.
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        self.into_inner()
    }
}

/// Heartbeat period in milliseconds.
#[nutype(
    validate(greater_or_equal = 100, less_or_equal = 300_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 5000
)]
pub struct HeartbeatIntervalMs(u64);

impl HeartbeatIntervalMs {
    /// Converts to Duration.
    #[must_use]
    pub fn as_duration(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.into_inner())
    }

    /// Raw milliseconds.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.into_inner()
    }
}

/// Byte budget per priority class of a ring transport.
#[nutype(
    validate(greater_or_equal = 4096, less_or_equal = 1_073_741_824),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 16_777_216
)]
pub struct RingCapacityBytes(usize);

impl RingCapacityBytes {
    /// Raw byte count.
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Slot count per priority class; must be a power of two.
#[nutype(
    validate(predicate = |n| n.is_power_of_two() && (2..=65_536).contains(n)),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 1024
)]
pub struct RingSlotCount(usize);

impl RingSlotCount {
    /// Raw slot count.
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Period of the pending-request maintenance sweep in milliseconds.
///
/// Must stay at or below a quarter of the smallest request TTL in use.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 60_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 25
)]
pub struct SweepIntervalMs(u64);

impl SweepIntervalMs {
    /// Converts to Duration.
    #[must_use]
    pub fn as_duration(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.into_inner())
    }
}

/// Shutdown drain deadline in milliseconds.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 60_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 1000
)]
pub struct DrainDeadlineMs(u64);

impl DrainDeadlineMs {
    /// Converts to Duration.
    #[must_use]
    pub fn as_duration(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.into_inner())
    }
}

/// Maximum concurrent items a capability accepts.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1024),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 8
)]
pub struct MaxConcurrent(u32);

/// Closed set of agent specializations.
///
/// The original system's per-personality modules collapse to kind tags;
/// each kind also owns one bit of the RBAC permission mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum AgentKind {
    /// Passive observation and reporting.
    Monitor = 0,
    /// Information gathering.
    Researcher = 1,
    /// System design.
    Architect = 2,
    /// Code generation.
    Constructor = 3,
    /// Patch production.
    Patcher = 4,
    /// Fault isolation.
    Debugger = 5,
    /// Test execution.
    Testbed = 6,
    /// Static analysis.
    Linter = 7,
    /// Performance tuning.
    Optimizer = 8,
    /// API surface design.
    ApiDesigner = 9,
    /// Schema and query work.
    Database = 10,
    /// Web front-ends.
    Web = 11,
    /// Mobile targets.
    Mobile = 12,
    /// Python GUI work.
    PyGui = 13,
    /// Terminal interfaces.
    Tui = 14,
    /// Data analysis.
    DataScience = 15,
    /// Model operations.
    MlOps = 16,
    /// Documentation generation.
    Docgen = 17,
    /// C internals.
    CInternal = 18,
    /// Python internals.
    PythonInternal = 19,
    /// Cross-project coordination.
    ProjectOrchestrator = 20,
    /// Vulnerability analysis.
    Security = 21,
    /// Perimeter defense.
    Bastion = 22,
    /// Policy supervision.
    Oversight = 23,
    /// Host provisioning.
    Infrastructure = 24,
    /// Release rollout.
    Deployer = 25,
    /// Artifact packaging.
    Packager = 26,
    /// GNU toolchain work.
    Gnu = 27,
    /// Kernel-level work.
    Kernel = 28,
    /// Embedded targets.
    Embedded = 29,
}

impl AgentKind {
    /// Every kind, in bit order.
    pub const ALL: [AgentKind; 30] = [
        AgentKind::Monitor,
        AgentKind::Researcher,
        AgentKind::Architect,
        AgentKind::Constructor,
        AgentKind::Patcher,
        AgentKind::Debugger,
        AgentKind::Testbed,
        AgentKind::Linter,
        AgentKind::Optimizer,
        AgentKind::ApiDesigner,
        AgentKind::Database,
        AgentKind::Web,
        AgentKind::Mobile,
        AgentKind::PyGui,
        AgentKind::Tui,
        AgentKind::DataScience,
        AgentKind::MlOps,
        AgentKind::Docgen,
        AgentKind::CInternal,
        AgentKind::PythonInternal,
        AgentKind::ProjectOrchestrator,
        AgentKind::Security,
        AgentKind::Bastion,
        AgentKind::Oversight,
        AgentKind::Infrastructure,
        AgentKind::Deployer,
        AgentKind::Packager,
        AgentKind::Gnu,
        AgentKind::Kernel,
        AgentKind::Embedded,
    ];

    /// Position of this kind's bit in the permission mask.
    #[must_use]
    pub fn bit_index(self) -> u32 {
        self as u32
    }
}

/// Lifecycle state of a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Registered but not yet serving traffic.
    Initializing,
    /// Serving traffic normally.
    Active,
    /// Serving traffic with reduced capacity.
    Degraded,
    /// Temporarily not serving traffic.
    Unavailable,
    /// Permanently failed.
    Failed,
    /// Draining before unregistration.
    ShuttingDown,
}

impl LifecycleState {
    /// Whether the state allows message delivery.
    #[must_use]
    pub fn accepts_traffic(self) -> bool {
        matches!(self, LifecycleState::Active | LifecycleState::Degraded)
    }
}

/// Target-selection strategy for topics and work queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoutingStrategy {
    /// Atomic cursor modulo worker count.
    RoundRobin,
    /// Smallest load factor; ties by lowest agent id.
    LeastLoaded,
    /// Highest capability performance rating; ties by lowest agent id.
    HighestPriority,
    /// Uniform random worker.
    Random,
    /// Stable hash of a caller key onto the id-sorted worker ring.
    ConsistentHash,
}

/// Transport kind of an agent endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    /// Unix-domain or equivalent local IPC.
    #[serde(rename = "ipc")]
    Ipc,
    /// Shared-memory segment.
    #[serde(rename = "shm")]
    SharedMemory,
    /// TCP bound to loopback only.
    #[serde(rename = "loopback-tcp")]
    LoopbackTcp,
}

/// Capability descriptor advertised at registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    /// Capability name, the discovery index key.
    pub name: CapabilityName,
    /// Version string.
    pub version: CapabilityVersion,
    /// Self-reported quality rating.
    pub performance_rating: PerformanceRating,
    /// Concurrency bound.
    pub max_concurrent: MaxConcurrent,
}

/// Endpoint descriptor, serialized for tools external to the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Transport family.
    pub transport: TransportKind,
    /// Address string, at most 64 bytes.
    pub address: EndpointAddress,
    /// Optional port (loopback TCP only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// Point-in-time health observation for an agent.
///
/// Replaced atomically as a block by `update_health`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// Monotonic timestamp of the last heartbeat.
    pub last_heartbeat_ns: u64,
    /// Average response time in microseconds.
    pub avg_response_us: u64,
    /// Reported load ratio.
    pub load_factor: LoadFactor,
    /// Depth of the agent's inbox at report time.
    pub queue_depth: u32,
    /// Open connection count.
    pub active_connections: u32,
    /// Cumulative error count.
    pub error_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_name_rejects_oversized_and_unprintable() {
        assert!(TopicName::try_new("alerts".to_string()).is_ok());
        assert!(TopicName::try_new(String::new()).is_err());
        assert!(TopicName::try_new("x".repeat(129)).is_err());
        assert!(TopicName::try_new("bad\nname".to_string()).is_err());
    }

    #[test]
    fn load_factor_bounds() {
        assert!(LoadFactor::try_new(0.0).is_ok());
        assert!(LoadFactor::try_new(1.0).is_ok());
        assert!(LoadFactor::try_new(1.01).is_err());
        assert!(LoadFactor::try_new(-0.1).is_err());
    }

    #[test]
    fn agent_kind_bits_are_dense_and_unique() {
        let mut seen = 0u32;
        for kind in AgentKind::ALL {
            let bit = 1u32 << kind.bit_index();
            assert_eq!(seen & bit, 0, "duplicate bit for {kind:?}");
            seen |= bit;
        }
        assert_eq!(seen.count_ones(), 30);
    }

    #[test]
    fn endpoint_descriptor_serial_form() {
        let ep = Endpoint {
            transport: TransportKind::LoopbackTcp,
            address: EndpointAddress::try_new("127.0.0.1".to_string()).unwrap(),
            port: Some(7400),
        };
        let json = serde_json::to_string(&ep).unwrap();
        assert!(json.contains("\"loopback-tcp\""), "unexpected form: {json}");
    }
}
