//! Fabric configuration
//!
//! Typed configuration with presets for different deployment shapes, a
//! builder, validation, and environment-variable overrides
//! (`FABRIC_HOME`, `FABRIC_HEARTBEAT_MS`, `FABRIC_RING_CAPACITY`).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain_types::{
    DrainDeadlineMs, HeartbeatIntervalMs, RingCapacityBytes, RingSlotCount, SweepIntervalMs,
};
use crate::error::ConfigError;

/// State directory override.
pub const ENV_HOME: &str = "FABRIC_HOME";

/// Heartbeat period override, milliseconds.
pub const ENV_HEARTBEAT_MS: &str = "FABRIC_HEARTBEAT_MS";

/// Per-class ring byte budget override.
pub const ENV_RING_CAPACITY: &str = "FABRIC_RING_CAPACITY";

/// Complete fabric configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FabricConfig {
    /// Agent heartbeat period.
    pub heartbeat_interval: HeartbeatIntervalMs,
    /// Slots per priority class in every inbox ring.
    pub ring_slots: RingSlotCount,
    /// Byte budget per priority class in every inbox ring.
    pub ring_capacity_bytes: RingCapacityBytes,
    /// Pending-request sweep period.
    pub sweep_interval: SweepIntervalMs,
    /// Shutdown drain deadline per agent.
    pub drain_deadline: DrainDeadlineMs,
    /// Run the dead-letter retry worker.
    pub enable_dlq_retry: bool,
    /// Run the background maintenance threads (pending sweep, session
    /// cleanup, dead-letter retry). Disabled by the testing preset so
    /// tests drive the sweeps deterministically.
    pub enable_maintenance: bool,
    /// Pin harness worker threads to CPU classes when the platform
    /// supports it. Correctness never depends on this.
    pub enable_affinity: bool,
    /// Optional state directory (audit export and similar tooling).
    pub home: Option<PathBuf>,
}

impl FabricConfig {
    /// Development preset: short intervals for fast feedback, smaller
    /// rings, affinity off.
    #[must_use]
    pub fn development() -> Self {
        Self {
            heartbeat_interval: HeartbeatIntervalMs::try_new(1000)
                .unwrap_or_default(),
            ring_slots: RingSlotCount::try_new(256).unwrap_or_default(),
            ring_capacity_bytes: RingCapacityBytes::try_new(1024 * 1024)
                .unwrap_or_default(),
            sweep_interval: SweepIntervalMs::try_new(10).unwrap_or_default(),
            drain_deadline: DrainDeadlineMs::try_new(250).unwrap_or_default(),
            enable_dlq_retry: true,
            enable_maintenance: true,
            enable_affinity: false,
            home: None,
        }
    }

    /// Production preset: default heartbeat (5 s), 16 MiB per class,
    /// affinity on where available.
    #[must_use]
    pub fn production() -> Self {
        Self {
            heartbeat_interval: HeartbeatIntervalMs::default(),
            ring_slots: RingSlotCount::default(),
            ring_capacity_bytes: RingCapacityBytes::default(),
            sweep_interval: SweepIntervalMs::default(),
            drain_deadline: DrainDeadlineMs::default(),
            enable_dlq_retry: true,
            enable_maintenance: true,
            enable_affinity: true,
            home: None,
        }
    }

    /// Testing preset: maintenance threads off so tests call the sweep
    /// and retry passes themselves against an injected clock.
    #[must_use]
    pub fn testing() -> Self {
        Self {
            enable_maintenance: false,
            enable_dlq_retry: false,
            ..Self::development()
        }
    }

    /// Starts a builder seeded with the development preset.
    #[must_use]
    pub fn builder() -> FabricConfigBuilder {
        FabricConfigBuilder {
            config: Self::development(),
        }
    }

    /// Applies environment overrides on top of this configuration.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Env`] when a variable is present but unparseable
    /// or out of range.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(home) = std::env::var(ENV_HOME) {
            if home.is_empty() {
                return Err(ConfigError::Env {
                    var: ENV_HOME,
                    reason: "empty path".to_string(),
                });
            }
            self.home = Some(PathBuf::from(home));
        }
        if let Ok(raw) = std::env::var(ENV_HEARTBEAT_MS) {
            let ms: u64 = raw.parse().map_err(|_| ConfigError::Env {
                var: ENV_HEARTBEAT_MS,
                reason: format!("not an integer: {raw}"),
            })?;
            self.heartbeat_interval =
                HeartbeatIntervalMs::try_new(ms).map_err(|e| ConfigError::Env {
                    var: ENV_HEARTBEAT_MS,
                    reason: e.to_string(),
                })?;
        }
        if let Ok(raw) = std::env::var(ENV_RING_CAPACITY) {
            let bytes: usize = raw.parse().map_err(|_| ConfigError::Env {
                var: ENV_RING_CAPACITY,
                reason: format!("not an integer: {raw}"),
            })?;
            self.ring_capacity_bytes =
                RingCapacityBytes::try_new(bytes).map_err(|e| ConfigError::Env {
                    var: ENV_RING_CAPACITY,
                    reason: e.to_string(),
                })?;
        }
        Ok(self)
    }

    /// Cross-field validation.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] when the sweep period exceeds the
    /// heartbeat period (timeouts would outlive health staleness) or
    /// the per-class byte budget cannot hold a single maximal header.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sweep_ms: u64 = self.sweep_interval.into_inner();
        if sweep_ms > self.heartbeat_interval.as_u64() {
            return Err(ConfigError::Invalid {
                field: "sweep_interval",
                reason: format!(
                    "{sweep_ms}ms exceeds the heartbeat interval {}ms",
                    self.heartbeat_interval.as_u64()
                ),
            });
        }
        if self.ring_capacity_bytes.as_usize() < crate::transport::FrameHeader::SIZE {
            return Err(ConfigError::Invalid {
                field: "ring_capacity_bytes",
                reason: "smaller than one frame header".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self::development()
    }
}

/// Builder over [`FabricConfig`].
#[derive(Debug, Clone)]
pub struct FabricConfigBuilder {
    config: FabricConfig,
}

impl FabricConfigBuilder {
    /// Sets the heartbeat period.
    #[must_use]
    pub fn heartbeat_interval(mut self, value: HeartbeatIntervalMs) -> Self {
        self.config.heartbeat_interval = value;
        self
    }

    /// Sets the per-class slot count.
    #[must_use]
    pub fn ring_slots(mut self, value: RingSlotCount) -> Self {
        self.config.ring_slots = value;
        self
    }

    /// Sets the per-class byte budget.
    #[must_use]
    pub fn ring_capacity_bytes(mut self, value: RingCapacityBytes) -> Self {
        self.config.ring_capacity_bytes = value;
        self
    }

    /// Sets the pending-sweep period.
    #[must_use]
    pub fn sweep_interval(mut self, value: SweepIntervalMs) -> Self {
        self.config.sweep_interval = value;
        self
    }

    /// Sets the shutdown drain deadline.
    #[must_use]
    pub fn drain_deadline(mut self, value: DrainDeadlineMs) -> Self {
        self.config.drain_deadline = value;
        self
    }

    /// Toggles the dead-letter retry worker.
    #[must_use]
    pub fn enable_dlq_retry(mut self, value: bool) -> Self {
        self.config.enable_dlq_retry = value;
        self
    }

    /// Toggles the maintenance threads.
    #[must_use]
    pub fn enable_maintenance(mut self, value: bool) -> Self {
        self.config.enable_maintenance = value;
        self
    }

    /// Toggles CPU-class thread pinning.
    #[must_use]
    pub fn enable_affinity(mut self, value: bool) -> Self {
        self.config.enable_affinity = value;
        self
    }

    /// Sets the state directory.
    #[must_use]
    pub fn home(mut self, value: PathBuf) -> Self {
        self.config.home = Some(value);
        self
    }

    /// Validates and returns the configuration.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] on cross-field violations.
    pub fn build(self) -> Result<FabricConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
