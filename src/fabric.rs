//! The fabric handle
//!
//! One explicit, shareable handle per process replaces the original
//! design's global singletons: it owns the clock, the discovery
//! registry, the router, and the RBAC store, and runs the maintenance
//! threads (pending-request sweep, session cleanup, dead-letter retry).
//! Initialize once, share by `Arc`; components never reach for ambient
//! state.
//!
//! Only initialization can fail. Once constructed, every data-path
//! operation reports errors through its subsystem's error enum and the
//! process is never terminated by the fabric.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::clock::{SharedClock, system_clock};
use crate::config::FabricConfig;
use crate::discovery::Discovery;
use crate::error::FabricError;
use crate::rbac::SecurityStore;
use crate::router::Router;
use crate::transport::RingTransport;
use crate::vector;

/// Period of the dead-letter retry pass.
const DLQ_RETRY_PERIOD: Duration = Duration::from_millis(50);

struct Maintenance {
    running: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

/// The process-wide message fabric.
pub struct Fabric {
    config: FabricConfig,
    clock: SharedClock,
    discovery: Arc<Discovery>,
    router: Arc<Router>,
    security: Arc<SecurityStore>,
    maintenance: Mutex<Option<Maintenance>>,
}

impl std::fmt::Debug for Fabric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fabric")
            .field("config", &self.config)
            .field("agents", &self.discovery.len())
            .finish()
    }
}

impl Fabric {
    /// Builds a fabric on the production clock.
    ///
    /// # Errors
    ///
    /// [`FabricError::Config`] for invalid configuration,
    /// [`FabricError::Init`] when a maintenance thread cannot start.
    pub fn new(config: FabricConfig) -> Result<Arc<Self>, FabricError> {
        Self::with_clock(config, system_clock())
    }

    /// Builds a fabric on an injected clock (tests drive time).
    ///
    /// # Errors
    ///
    /// Same as [`Fabric::new`].
    pub fn with_clock(config: FabricConfig, clock: SharedClock) -> Result<Arc<Self>, FabricError> {
        config.validate()?;
        // One-shot CPU probe; later calls are free.
        vector::init();

        let discovery = Arc::new(Discovery::new(config.heartbeat_interval, clock.clone()));
        let router = Arc::new(Router::new(Arc::clone(&discovery), clock.clone()));
        let security = Arc::new(SecurityStore::new(clock.clone()));

        let fabric = Arc::new(Self {
            config,
            clock,
            discovery,
            router,
            security,
            maintenance: Mutex::new(None),
        });
        if fabric.config.enable_maintenance {
            fabric.start_maintenance()?;
        }
        info!("fabric initialized");
        Ok(fabric)
    }

    fn start_maintenance(&self) -> Result<(), FabricError> {
        let running = Arc::new(AtomicBool::new(true));
        let mut handles = Vec::new();

        let sweep = {
            let running = Arc::clone(&running);
            let router = Arc::clone(&self.router);
            let security = Arc::clone(&self.security);
            let clock = self.clock.clone();
            let period = self.config.sweep_interval.as_duration();
            std::thread::Builder::new()
                .name("weft-sweep".to_string())
                .spawn(move || {
                    while running.load(Ordering::Acquire) {
                        let timed_out = router.sweep_pending();
                        let collected = security.cleanup_expired();
                        if timed_out > 0 || collected > 0 {
                            debug!(timed_out, collected, "maintenance sweep");
                        }
                        clock.sleep(period);
                    }
                })
                .map_err(|e| FabricError::Init {
                    message: format!("cannot start sweep thread: {e}"),
                })?
        };
        handles.push(sweep);

        if self.config.enable_dlq_retry {
            let handle = crate::router::spawn_retry_worker(
                self.router.dlq_handle(),
                Arc::clone(&self.discovery),
                self.clock.clone(),
                Arc::clone(&running),
                DLQ_RETRY_PERIOD,
            )
            .map_err(|e| FabricError::Init {
                message: format!("cannot start dead-letter retry thread: {e}"),
            })?;
            handles.push(handle);
        }

        *self.maintenance.lock() = Some(Maintenance { running, handles });
        Ok(())
    }

    /// Stops the maintenance threads. Idempotent; also runs on drop.
    pub fn shutdown(&self) {
        let Some(maintenance) = self.maintenance.lock().take() else {
            return;
        };
        maintenance.running.store(false, Ordering::Release);
        for handle in maintenance.handles {
            let _ = handle.join();
        }
        info!("fabric maintenance stopped");
    }

    /// Creates an inbox ring sized by this fabric's configuration.
    ///
    /// Agents own their inboxes; the registry only references them.
    #[must_use]
    pub fn new_inbox(&self) -> Arc<RingTransport> {
        Arc::new(RingTransport::new(
            self.config.ring_slots.as_usize(),
            self.config.ring_capacity_bytes.as_usize(),
            self.clock.clone(),
        ))
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &FabricConfig {
        &self.config
    }

    /// The injected clock.
    #[must_use]
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// The discovery registry.
    #[must_use]
    pub fn discovery(&self) -> &Arc<Discovery> {
        &self.discovery
    }

    /// The message router.
    #[must_use]
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// The RBAC/session store.
    #[must_use]
    pub fn security(&self) -> &Arc<SecurityStore> {
        &self.security
    }
}

impl Drop for Fabric {
    fn drop(&mut self) {
        self.shutdown();
    }
}
