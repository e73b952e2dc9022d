//! Loopback hardware module.
//!
//! Echoes joint position commands back as joint states. Useful to bring up
//! a controller without hardware and as the reference driver for the
//! runtime's contract.
//!
//! Interfaces (all `num_dofs` wide):
//! - `joint_position_command` (strict, written by the controller)
//! - `joint_position_state`, `joint_velocity_state`, `joint_acceleration_state`
//!
//! With `realtime.drives_realtime_clock` set, a clock thread ticks the
//! controller every millisecond while the module is active.

use crate::handle::{MutableHandle, StrictHandle};
use crate::init_context::InitContext;
use crate::module::{DriverError, DriverResult, HardwareModuleInterface};
use crate::realtime_clock::RealtimeClock;
use crate::validator::CommandValidator;
use hwm_shared_memory::{SegmentPayload, spawn_with_options};
use nix::sys::time::TimeSpec;
use nix::time::{ClockId, ClockNanosleepFlags, clock_gettime, clock_nanosleep};
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Upper bound for `num_dofs`.
pub const MAX_JOINTS: usize = 16;

const CLOCK_PERIOD: Duration = Duration::from_millis(1);
const CLOCK_TICK_TIMEOUT: Duration = Duration::from_secs(1);

// ─── Interface payloads ─────────────────────────────────────────────

macro_rules! joint_vector_payload {
    ($(#[$doc:meta] $name:ident => $type_id:literal),* $(,)?) => {
        $(
            #[$doc]
            #[repr(C)]
            #[derive(Debug, Clone, Copy, PartialEq)]
            pub struct $name {
                /// Number of valid entries in `values`.
                pub num_dofs: u32,
                _padding: u32,
                /// One value per joint [rad, rad/s or rad/s²].
                pub values: [f64; MAX_JOINTS],
            }

            impl $name {
                /// Zeroed vector with `num_dofs` joints.
                pub fn new(num_dofs: usize) -> Self {
                    Self {
                        num_dofs: num_dofs.min(MAX_JOINTS) as u32,
                        _padding: 0,
                        values: [0.0; MAX_JOINTS],
                    }
                }

                /// The valid entries.
                pub fn joints(&self) -> &[f64] {
                    &self.values[..(self.num_dofs as usize).min(MAX_JOINTS)]
                }

                /// The valid entries, mutable.
                pub fn joints_mut(&mut self) -> &mut [f64] {
                    let n = (self.num_dofs as usize).min(MAX_JOINTS);
                    &mut self.values[..n]
                }
            }

            unsafe impl SegmentPayload for $name {
                const TYPE_ID: &'static str = $type_id;
            }
        )*
    };
}

joint_vector_payload! {
    /// Joint position setpoints written by the controller.
    JointPositionCommand => "hwm.JointPositionCommand",
    /// Measured joint positions.
    JointPositionState => "hwm.JointPositionState",
    /// Measured joint velocities.
    JointVelocityState => "hwm.JointVelocityState",
    /// Measured joint accelerations.
    JointAccelerationState => "hwm.JointAccelerationState",
}

// ─── Configuration ──────────────────────────────────────────────────

/// `[module]` table of a loopback module.
#[derive(Debug, Clone, Deserialize)]
pub struct LoopbackConfig {
    /// Number of joints, 1..=16.
    #[serde(default = "default_num_dofs")]
    pub num_dofs: usize,
}

fn default_num_dofs() -> usize {
    6
}

// ─── Module ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Mode {
    Inactive = 0,
    Active = 1,
    MotionEnabled = 2,
    Shutdown = 3,
}

impl Mode {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Active,
            2 => Self::MotionEnabled,
            3 => Self::Shutdown,
            _ => Self::Inactive,
        }
    }
}

#[derive(Default)]
struct Interfaces {
    position_command: StrictHandle<JointPositionCommand>,
    position_state: MutableHandle<JointPositionState>,
    velocity_state: MutableHandle<JointVelocityState>,
    acceleration_state: MutableHandle<JointAccelerationState>,
}

/// Driver that copies commands to states.
pub struct LoopbackModule {
    num_dofs: usize,
    mode: Arc<AtomicU8>,
    interfaces: Mutex<Interfaces>,
    validator: Option<CommandValidator>,
    clock: Option<Arc<RealtimeClock>>,
    clock_thread: Mutex<Option<JoinHandle<()>>>,
}

impl LoopbackModule {
    /// Name the module registry knows this driver by.
    pub const TYPE_NAME: &'static str = "loopback";

    /// Uninitialized module.
    pub fn new() -> Self {
        Self {
            num_dofs: 0,
            mode: Arc::new(AtomicU8::new(Mode::Inactive as u8)),
            interfaces: Mutex::new(Interfaces::default()),
            validator: None,
            clock: None,
            clock_thread: Mutex::new(None),
        }
    }

    /// Factory for the module registry.
    pub fn factory() -> Box<dyn HardwareModuleInterface> {
        Box::new(Self::new())
    }

    /// Configured number of joints.
    pub fn num_dofs(&self) -> usize {
        self.num_dofs
    }

    fn set_mode(&self, mode: Mode) {
        self.mode.store(mode as u8, Ordering::Release);
    }

    fn start_clock(&self, context: &InitContext<'_>, clock: Arc<RealtimeClock>) -> DriverResult {
        let options = context
            .server_thread_options()
            .clone()
            .with_name("LoopbackClock");
        let mode = Arc::clone(&self.mode);
        let handle = spawn_with_options(&options, move || run_clock(&mode, &clock))
            .map_err(|e| DriverError::fault(&format!("Unable to start the clock thread: {e}")))?;
        *self.clock_thread.lock() = Some(handle);
        Ok(())
    }
}

impl Default for LoopbackModule {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareModuleInterface for LoopbackModule {
    fn init(&mut self, context: &mut InitContext<'_>) -> DriverResult {
        let config: LoopbackConfig = context.module_config()?;
        if !(1..=MAX_JOINTS).contains(&config.num_dofs) {
            return Err(DriverError::fault(&format!(
                "num_dofs {} outside 1..={MAX_JOINTS}",
                config.num_dofs
            )));
        }
        self.num_dofs = config.num_dofs;
        info!("Configuring loopback module for {} DOF", self.num_dofs);

        let n = self.num_dofs;
        let registry = context.registry();
        let interfaces = Interfaces {
            position_command: registry
                .advertise_strict_interface("joint_position_command", JointPositionCommand::new(n))?,
            position_state: registry
                .advertise_mutable_interface("joint_position_state", JointPositionState::new(n))?,
            velocity_state: registry
                .advertise_mutable_interface("joint_velocity_state", JointVelocityState::new(n))?,
            acceleration_state: registry.advertise_mutable_interface(
                "joint_acceleration_state",
                JointAccelerationState::new(n),
            )?,
        };
        self.validator = Some(CommandValidator::create(registry)?);
        *self.interfaces.get_mut() = interfaces;
        self.set_mode(Mode::Inactive);

        match context.realtime_clock() {
            None => info!("The controller is driving the loopback module clock."),
            Some(clock) => {
                info!("The loopback module is driving the controller's clock.");
                self.clock = Some(Arc::clone(&clock));
                self.start_clock(context, clock)?;
            }
        }
        Ok(())
    }

    fn activate(&self) -> DriverResult {
        self.set_mode(Mode::Active);
        Ok(())
    }

    fn deactivate(&self) -> DriverResult {
        self.set_mode(Mode::Inactive);
        Ok(())
    }

    fn enable_motion(&self) -> DriverResult {
        info!("Enabling motion on loopback module");
        self.set_mode(Mode::MotionEnabled);
        Ok(())
    }

    fn disable_motion(&self) -> DriverResult {
        info!("Disabling motion on loopback module");
        self.set_mode(Mode::Active);
        Ok(())
    }

    fn clear_faults(&self) -> DriverResult {
        info!("Clearing faults on loopback module");
        self.set_mode(Mode::Active);
        Ok(())
    }

    fn shutdown(&self) -> DriverResult {
        self.set_mode(Mode::Shutdown);
        if let Some(clock) = &self.clock {
            clock.close();
        }
        if let Some(handle) = self.clock_thread.lock().take() {
            if handle.join().is_err() {
                return Err(DriverError::fault("Loopback clock thread panicked"));
            }
        }
        Ok(())
    }

    fn read_status(&self) -> DriverResult {
        // States are written in `apply_command`.
        Ok(())
    }

    fn apply_command(&self) -> DriverResult {
        let validator = self
            .validator
            .as_ref()
            .ok_or_else(|| DriverError::fault("Loopback module not initialized"))?;
        let cycle = validator.current_cycle()?;
        let now = monotonic_now_ns();

        let mut interfaces = self.interfaces.lock();
        let command = *interfaces.position_command.value()?;
        let joints = command.joints();

        interfaces
            .position_state
            .value_mut()?
            .joints_mut()
            .copy_from_slice(joints);
        interfaces.velocity_state.value_mut()?.joints_mut().fill(0.0);
        interfaces.acceleration_state.value_mut()?.joints_mut().fill(0.0);

        interfaces.position_state.updated_at(now, cycle)?;
        interfaces.velocity_state.updated_at(now, cycle)?;
        interfaces.acceleration_state.updated_at(now, cycle)?;
        Ok(())
    }
}

/// Tick the controller once per millisecond while the module is active.
fn run_clock(mode: &AtomicU8, clock: &RealtimeClock) {
    debug!("Entering loopback clock loop");
    let clock_id = ClockId::CLOCK_MONOTONIC;
    let Ok(mut next_wake) = clock_gettime(clock_id) else {
        warn!("clock_gettime failed, loopback clock not running");
        return;
    };

    loop {
        let current = Mode::from_u8(mode.load(Ordering::Acquire));
        if current == Mode::Shutdown {
            break;
        }
        next_wake = next_wake + TimeSpec::from_duration(CLOCK_PERIOD);

        if matches!(current, Mode::Active | Mode::MotionEnabled) {
            if let Err(e) = clock.tick_blocking_with_timeout(monotonic_now_ns(), CLOCK_TICK_TIMEOUT) {
                if Mode::from_u8(mode.load(Ordering::Acquire)) == Mode::Shutdown {
                    break;
                }
                warn!("Realtime clock tick failed: {e}");
                clock.reset();
                if let Ok(now) = clock_gettime(clock_id) {
                    next_wake = now;
                }
            }
        }

        let _ = clock_nanosleep(clock_id, ClockNanosleepFlags::TIMER_ABSTIME, &next_wake);
    }
    debug!("Leaving loopback clock loop");
}

/// CLOCK_MONOTONIC in nanoseconds.
fn monotonic_now_ns() -> u64 {
    clock_gettime(ClockId::CLOCK_MONOTONIC)
        .map(|t| (t.tv_sec() as u64).saturating_mul(1_000_000_000) + t.tv_nsec() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HwmError;
    use crate::handle::InterfaceHandle;
    use crate::interfaces::IconState;
    use crate::registry::HardwareInterfaceRegistry;
    use hwm_common::config::ModuleConfig;
    use hwm_common::consts::ICON_STATE_INTERFACE_NAME;
    use hwm_shared_memory::ThreadOptions;
    use tempfile::TempDir;

    fn config(dir: &TempDir, num_dofs: i64) -> ModuleConfig {
        let mut config = ModuleConfig::new("loopback");
        config.shared_memory_root = dir.path().to_path_buf();
        config
            .module
            .insert("num_dofs".to_string(), toml::Value::Integer(num_dofs));
        config
    }

    fn init(registry: &mut HardwareInterfaceRegistry, config: &ModuleConfig) -> DriverResult<LoopbackModule> {
        let mut module = LoopbackModule::new();
        let mut context = InitContext::new(registry, config, None, ThreadOptions::default());
        module.init(&mut context)?;
        Ok(module)
    }

    /// Play the controller: advance `icon_state` and write a command.
    fn controller_cycle(registry: &HardwareInterfaceRegistry, cycle: u64, positions: &[f64]) -> Result<(), HwmError> {
        let manager = registry.manager();
        let mut icon = manager.get_mut::<IconState>(ICON_STATE_INTERFACE_NAME)?;
        icon.value_mut().current_cycle = cycle;
        icon.updated_at(0, cycle);

        let mut command = manager.get_mut::<JointPositionCommand>("joint_position_command")?;
        command.value_mut().joints_mut().copy_from_slice(positions);
        command.updated_at(0, cycle);
        Ok(())
    }

    #[test]
    fn init_advertises_joint_interfaces() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, 3);
        let mut registry = HardwareInterfaceRegistry::create(&config).unwrap();
        let module = init(&mut registry, &config).unwrap();
        assert_eq!(module.num_dofs(), 3);

        let names = registry.interface_names();
        for name in [
            "joint_position_command",
            "joint_position_state",
            "joint_velocity_state",
            "joint_acceleration_state",
        ] {
            assert!(names.iter().any(|n| n == name), "missing {name}");
        }
        registry.advertise_hardware_info().unwrap();
        let info = registry
            .manager()
            .get::<hwm_shared_memory::SegmentInfo>(hwm_common::consts::MODULE_INFO_NAME)
            .unwrap();
        assert_eq!(info.value().required_names(), vec!["joint_position_command"]);
    }

    #[test]
    fn num_dofs_defaults_to_six() {
        let dir = TempDir::new().unwrap();
        let mut config = ModuleConfig::new("loopback");
        config.shared_memory_root = dir.path().to_path_buf();
        let mut registry = HardwareInterfaceRegistry::create(&config).unwrap();
        assert_eq!(init(&mut registry, &config).unwrap().num_dofs(), 6);
    }

    #[test]
    fn too_many_joints_fail_init() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, 17);
        let mut registry = HardwareInterfaceRegistry::create(&config).unwrap();
        let err = init(&mut registry, &config).err().unwrap();
        assert!(!err.is_fatal());
        assert!(err.message.contains("num_dofs 17"));
    }

    #[test]
    fn fresh_command_is_echoed() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, 3);
        let mut registry = HardwareInterfaceRegistry::create(&config).unwrap();
        let module = init(&mut registry, &config).unwrap();

        controller_cycle(&registry, 7, &[0.1, 0.2, 0.3]).unwrap();
        module.apply_command().unwrap();

        let state = registry
            .get_interface_handle::<JointPositionState>("joint_position_state")
            .unwrap();
        assert_eq!(state.value().unwrap().joints(), &[0.1, 0.2, 0.3]);
        assert_eq!(state.last_updated_cycle().unwrap(), 7);
        let velocity = registry
            .get_interface_handle::<JointVelocityState>("joint_velocity_state")
            .unwrap();
        assert!(velocity.value().unwrap().joints().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn stale_command_is_a_fault() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, 2);
        let mut registry = HardwareInterfaceRegistry::create(&config).unwrap();
        let module = init(&mut registry, &config).unwrap();

        controller_cycle(&registry, 3, &[1.0, 2.0]).unwrap();
        {
            let mut icon = registry
                .manager()
                .get_mut::<IconState>(ICON_STATE_INTERFACE_NAME)
                .unwrap();
            icon.value_mut().current_cycle = 4;
            icon.updated_at(0, 4);
        }
        let err = module.apply_command().unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(
            err.message.as_str(),
            "Command was not updated this cycle. icon_cycle[4] != command_cycle[3]"
        );
    }

    #[test]
    fn shutdown_without_clock_is_immediate() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, 1);
        let mut registry = HardwareInterfaceRegistry::create(&config).unwrap();
        let module = init(&mut registry, &config).unwrap();
        module.activate().unwrap();
        module.shutdown().unwrap();
    }
}
