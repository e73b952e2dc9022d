//! Everything a driver gets to see during `init`.

use crate::error::{HwmError, HwmResult};
use crate::realtime_clock::RealtimeClock;
use crate::registry::HardwareInterfaceRegistry;
use hwm_common::config::ModuleConfig;
use hwm_shared_memory::{RemoteTriggerServer, ThreadOptions};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::info;

/// Prefix of trigger names created by [`InitContext::register_service`].
pub const SERVICE_PREFIX: &str = "service.";

/// Init-time view of the runtime.
pub struct InitContext<'a> {
    registry: &'a mut HardwareInterfaceRegistry,
    config: &'a ModuleConfig,
    realtime_clock: Option<Arc<RealtimeClock>>,
    server_thread_options: ThreadOptions,
    services: Vec<RemoteTriggerServer>,
}

impl<'a> InitContext<'a> {
    /// Context over `registry` and `config`.
    pub fn new(
        registry: &'a mut HardwareInterfaceRegistry,
        config: &'a ModuleConfig,
        realtime_clock: Option<Arc<RealtimeClock>>,
        server_thread_options: ThreadOptions,
    ) -> Self {
        Self {
            registry,
            config,
            realtime_clock,
            server_thread_options,
            services: Vec::new(),
        }
    }

    /// Registry to advertise interfaces on.
    pub fn registry(&mut self) -> &mut HardwareInterfaceRegistry {
        &mut *self.registry
    }

    /// Full module configuration.
    pub fn config(&self) -> &ModuleConfig {
        self.config
    }

    /// The `[module]` table decoded into the driver's own type.
    pub fn module_config<T: DeserializeOwned>(&self) -> HwmResult<T> {
        Ok(self.config.module_config()?)
    }

    /// Clock to tick if the module drives the controller's cycle.
    pub fn realtime_clock(&self) -> Option<Arc<RealtimeClock>> {
        self.realtime_clock.clone()
    }

    /// Scheduling options for threads that must run like the cycle thread.
    pub fn server_thread_options(&self) -> &ThreadOptions {
        &self.server_thread_options
    }

    /// Register a request/response service.
    ///
    /// The service becomes reachable as trigger `service.<name>` once `init`
    /// returned successfully and stays reachable until shutdown.
    pub fn register_service<F>(&mut self, name: &str, callback: F) -> HwmResult<()>
    where
        F: Fn() + Send + Sync + 'static,
    {
        if name.is_empty() {
            return Err(HwmError::invalid_argument("Service name cannot be empty"));
        }
        let trigger_name = format!("{SERVICE_PREFIX}{name}");
        let server =
            RemoteTriggerServer::create(self.registry.manager_mut(), &trigger_name, callback)?;
        info!("Registered service '{trigger_name}'");
        self.services.push(server);
        Ok(())
    }

    /// Services registered so far; consumed by the runtime after `init`.
    pub(crate) fn into_services(self) -> Vec<RemoteTriggerServer> {
        self.services
    }
}
