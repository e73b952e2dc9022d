//! Hardware module runtime.
//!
//! Wires one driver to its interface registry, the callback handler and the
//! trigger servers the controller talks to.
//!
//! ```text
//!  controller ──activate/deactivate──▶ Activate / Deactivate threads ─┐
//!             ──enable/disable/clear─▶ StateChange thread (query) ────┤
//!             ──read_status─────────▶ ReadStatus thread ──────────────┼─▶ CallbackHandler ─▶ driver
//!             ──apply_command───────▶ ApplyCommand thread ────────────┘
//! ```
//!
//! Trigger segments exist from [`HardwareModuleRuntime::create`] on so that
//! they appear in the interface directory; they only reach the driver once
//! [`HardwareModuleRuntime::run`] initialized it.

use crate::callback_handler::CallbackHandler;
use crate::error::{HwmError, HwmResult};
use crate::init_context::InitContext;
use crate::module::{DriverResult, HardwareModuleInterface};
use crate::realtime_clock::RealtimeClock;
use crate::registry::HardwareInterfaceRegistry;
use crate::state_mirror::StateMirror;
use hwm_common::config::ModuleConfig;
use hwm_common::state::{HardwareModuleState, StateCode};
use hwm_shared_memory::{RemoteTriggerServer, ThreadOptions, spawn_with_options};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use tracing::{error, info, warn};

/// Trigger name of `prepare`.
pub const PREPARE_TRIGGER: &str = "prepare";
/// Trigger name of `activate`.
pub const ACTIVATE_TRIGGER: &str = "activate";
/// Trigger name of `deactivate`.
pub const DEACTIVATE_TRIGGER: &str = "deactivate";
/// Trigger name of `enable_motion`.
pub const ENABLE_MOTION_TRIGGER: &str = "enable_motion";
/// Trigger name of `disable_motion`.
pub const DISABLE_MOTION_TRIGGER: &str = "disable_motion";
/// Trigger name of `clear_faults`.
pub const CLEAR_FAULTS_TRIGGER: &str = "clear_faults";
/// Trigger name of `read_status`.
pub const READ_STATUS_TRIGGER: &str = "read_status";
/// Trigger name of `apply_command`.
pub const APPLY_COMMAND_TRIGGER: &str = "apply_command";

/// Priority distance of the lifecycle threads below the cycle threads.
const LOW_PRIORITY_OFFSET: i32 = 9;

type HandlerSlot = Arc<OnceLock<Arc<CallbackHandler>>>;

/// Triggers served one request at a time by the StateChange thread.
struct StateChangeServers {
    prepare: RemoteTriggerServer,
    enable_motion: RemoteTriggerServer,
    disable_motion: RemoteTriggerServer,
    clear_faults: RemoteTriggerServer,
}

impl StateChangeServers {
    fn query_all(&self) {
        self.prepare.query();
        self.enable_motion.query();
        self.disable_motion.query();
        self.clear_faults.query();
    }
}

enum Driver {
    Uninitialized(Box<dyn HardwareModuleInterface>),
    Initialized(Arc<dyn HardwareModuleInterface>),
    Empty,
}

impl Driver {
    fn get(&self) -> Option<&dyn HardwareModuleInterface> {
        match self {
            Self::Uninitialized(module) => Some(module.as_ref()),
            Self::Initialized(module) => Some(module.as_ref()),
            Self::Empty => None,
        }
    }
}

/// Runs one hardware module.
pub struct HardwareModuleRuntime {
    config: ModuleConfig,
    registry: HardwareInterfaceRegistry,
    state: Arc<StateMirror>,
    driver: Driver,
    handler: HandlerSlot,
    realtime_clock: Option<Arc<RealtimeClock>>,

    activate_server: RemoteTriggerServer,
    deactivate_server: RemoteTriggerServer,
    read_status_server: RemoteTriggerServer,
    apply_command_server: RemoteTriggerServer,
    state_change_servers: Arc<StateChangeServers>,
    state_change_thread: Option<JoinHandle<()>>,
    services: Vec<RemoteTriggerServer>,

    stop_requested: Arc<AtomicBool>,
    stopped: bool,
}

impl HardwareModuleRuntime {
    /// Set up the shared memory of `module` as described by `config`.
    ///
    /// Advertises `hardware_module_state`, the lifecycle triggers and, with
    /// `drives_realtime_clock`, the `realtime_clock` segment. The driver is
    /// not touched until [`run`](Self::run).
    pub fn create(module: Box<dyn HardwareModuleInterface>, config: ModuleConfig) -> HwmResult<Self> {
        let mut registry = HardwareInterfaceRegistry::create(&config)?;
        let state = Arc::new(StateMirror::create(&mut registry)?);

        let realtime_clock = if config.realtime.drives_realtime_clock {
            Some(Arc::new(RealtimeClock::create(registry.manager_mut())?))
        } else {
            None
        };

        let handler: HandlerSlot = Arc::new(OnceLock::new());
        let activate_server =
            trigger_server(&mut registry, &handler, ACTIVATE_TRIGGER, CallbackHandler::on_activate)?;
        let deactivate_server = trigger_server(
            &mut registry,
            &handler,
            DEACTIVATE_TRIGGER,
            CallbackHandler::on_deactivate,
        )?;
        let read_status_server = trigger_server(
            &mut registry,
            &handler,
            READ_STATUS_TRIGGER,
            CallbackHandler::on_read_status,
        )?;
        let apply_command_server = trigger_server(
            &mut registry,
            &handler,
            APPLY_COMMAND_TRIGGER,
            CallbackHandler::on_apply_command,
        )?;
        let state_change_servers = StateChangeServers {
            prepare: trigger_server(&mut registry, &handler, PREPARE_TRIGGER, CallbackHandler::on_prepare)?,
            enable_motion: trigger_server(&mut registry, &handler, ENABLE_MOTION_TRIGGER, |h| {
                log_action_error("EnableMotion", h.on_enable_motion());
            })?,
            disable_motion: trigger_server(&mut registry, &handler, DISABLE_MOTION_TRIGGER, |h| {
                log_action_error("DisableMotion", h.on_disable_motion());
            })?,
            clear_faults: trigger_server(&mut registry, &handler, CLEAR_FAULTS_TRIGGER, |h| {
                log_action_error("ClearFaults", h.on_clear_faults());
            })?,
        };

        info!("Hardware module '{}' connected", config.name);
        Ok(Self {
            config,
            registry,
            state,
            driver: Driver::Uninitialized(module),
            handler,
            realtime_clock,
            activate_server,
            deactivate_server,
            read_status_server,
            apply_command_server,
            state_change_servers: Arc::new(state_change_servers),
            state_change_thread: None,
            services: Vec::new(),
            stop_requested: Arc::new(AtomicBool::new(false)),
            stopped: false,
        })
    }

    /// Initialize the driver and start serving triggers.
    ///
    /// The interface directory is published even if `init` fails so the
    /// controller can still attach and read the `InitFailed` state. Any
    /// failure leaves the module in `InitFailed`.
    pub fn run(&mut self, use_realtime_scheduling: bool, cpu_affinity: &[usize]) -> HwmResult<()> {
        let mut module = match std::mem::replace(&mut self.driver, Driver::Empty) {
            Driver::Uninitialized(module) => module,
            other => {
                self.driver = other;
                return Err(HwmError::failed_precondition(
                    "Hardware module runtime is already running",
                ));
            }
        };

        let high = thread_options(use_realtime_scheduling, self.config.realtime.priority, cpu_affinity);
        let low = thread_options(
            use_realtime_scheduling,
            (self.config.realtime.priority - LOW_PRIORITY_OFFSET).max(1),
            cpu_affinity,
        );

        let mut context = InitContext::new(
            &mut self.registry,
            &self.config,
            self.realtime_clock.clone(),
            high.clone(),
        );
        let init_result = module.init(&mut context);
        let services = context.into_services();

        let module: Arc<dyn HardwareModuleInterface> = Arc::from(module);
        self.driver = Driver::Initialized(Arc::clone(&module));

        if let Err(e) = &init_result {
            error!("Initializing the module failed with: {e}");
            self.set_init_failed(&e.message);
        }
        if let Err(e) = self.registry.advertise_hardware_info() {
            self.set_init_failed(e.message());
            return Err(e);
        }
        init_result?;

        let handler = Arc::new(CallbackHandler::new(module, Arc::clone(&self.state)));
        if self.handler.set(handler).is_err() {
            return Err(HwmError::internal("Callback handler installed twice"));
        }
        self.services = services;

        if let Err(e) = self.start_threads(&high, &low) {
            self.set_init_failed(e.message());
            return Err(e);
        }
        info!("Hardware module '{}' running", self.config.name);
        Ok(())
    }

    fn start_threads(&mut self, high: &ThreadOptions, low: &ThreadOptions) -> HwmResult<()> {
        let servers = Arc::clone(&self.state_change_servers);
        let stop_requested = Arc::clone(&self.stop_requested);
        self.state_change_thread = Some(spawn_with_options(
            &low.clone().with_name("StateChange"),
            move || {
                while !stop_requested.load(Ordering::Acquire) {
                    servers.query_all();
                }
            },
        )?);

        self.activate_server
            .start_async(&low.clone().with_name("Activate"))?;
        self.deactivate_server
            .start_async(&low.clone().with_name("Deactivate"))?;
        self.read_status_server
            .start_async(&high.clone().with_name("ReadStatus"))?;
        self.apply_command_server
            .start_async(&high.clone().with_name("ApplyCommand"))?;

        for service in &mut self.services {
            let options = ThreadOptions::named(service.name().to_string());
            service.start_async(&options)?;
        }
        Ok(())
    }

    fn set_init_failed(&self, message: &str) {
        self.state
            .set_state_directly(StateCode::InitFailed, message, false, false);
    }

    /// Stop serving triggers, shut the driver down and join all threads.
    ///
    /// The driver's `shutdown` has to unblock any callback still running;
    /// this only waits.
    pub fn stop(&mut self) -> DriverResult {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;

        if let Some(handler) = self.handler.get() {
            handler.shutdown();
        }
        self.apply_command_server.stop();
        self.read_status_server.stop();
        self.stop_requested.store(true, Ordering::Release);

        let result = self.driver.get().map_or(Ok(()), |module| module.shutdown());
        if let Err(e) = &result {
            warn!("Driver shutdown failed: {e}");
        }

        if let Some(thread) = self.state_change_thread.take() {
            if thread.join().is_err() {
                error!("StateChange thread panicked");
            }
        }
        self.activate_server.stop();
        self.deactivate_server.stop();
        for service in &mut self.services {
            service.stop();
        }
        info!("Hardware module '{}' stopped", self.config.name);
        result
    }

    /// Whether the cycle and lifecycle threads are up.
    pub fn is_started(&self) -> bool {
        self.state_change_thread
            .as_ref()
            .is_some_and(|thread| !thread.is_finished())
            && self.read_status_server.is_started()
            && self.apply_command_server.is_started()
    }

    /// Callback handler, available once [`run`](Self::run) initialized the
    /// driver.
    pub fn callback_handler(&self) -> Option<&Arc<CallbackHandler>> {
        self.handler.get()
    }

    /// Interface registry of the module.
    pub fn registry(&self) -> &HardwareInterfaceRegistry {
        &self.registry
    }

    /// Module configuration.
    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    /// Clock segment, if the module drives the controller's cycle.
    pub fn realtime_clock(&self) -> Option<&Arc<RealtimeClock>> {
        self.realtime_clock.as_ref()
    }

    /// Latest published state.
    pub fn hardware_module_state(&self) -> HardwareModuleState {
        self.state.hardware_module_state()
    }

    /// Force the module into `state`, bypassing the transition guard.
    pub fn set_state_test_only(&self, state: StateCode) {
        self.state.set_state_directly(state, "", true, false);
    }
}

impl Drop for HardwareModuleRuntime {
    fn drop(&mut self) {
        if matches!(self.driver, Driver::Initialized(_)) {
            let _ = self.stop();
        }
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

fn trigger_server(
    registry: &mut HardwareInterfaceRegistry,
    handler: &HandlerSlot,
    name: &str,
    callback: fn(&CallbackHandler),
) -> HwmResult<RemoteTriggerServer> {
    let handler = Arc::clone(handler);
    let server = RemoteTriggerServer::create(registry.manager_mut(), name, move || {
        if let Some(handler) = handler.get() {
            callback(handler);
        }
    })?;
    Ok(server)
}

fn thread_options(realtime: bool, priority: i32, cpu_affinity: &[usize]) -> ThreadOptions {
    if realtime {
        ThreadOptions::default()
            .with_realtime_priority(priority)
            .with_affinity(cpu_affinity.iter().copied())
    } else {
        ThreadOptions::default()
    }
}

fn log_action_error(action: &str, result: HwmResult<()>) {
    if let Err(e) = result {
        warn!("{action} failed: {e}");
    }
}
