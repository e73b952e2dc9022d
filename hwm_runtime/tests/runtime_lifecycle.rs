//! Runtime tests driven through the remote triggers, the way a controller
//! in another process would.

use hwm_common::config::ModuleConfig;
use hwm_common::consts::{HARDWARE_MODULE_STATE_INTERFACE_NAME, MODULE_INFO_NAME, REALTIME_CLOCK_NAME};
use hwm_common::state::StateCode;
use hwm_runtime::runtime::{
    ACTIVATE_TRIGGER, APPLY_COMMAND_TRIGGER, CLEAR_FAULTS_TRIGGER, DEACTIVATE_TRIGGER,
    DISABLE_MOTION_TRIGGER, ENABLE_MOTION_TRIGGER, READ_STATUS_TRIGGER,
};
use hwm_runtime::{
    DriverResult, ErrorKind, HardwareModuleInterface, HardwareModuleRuntime,
    HardwareModuleStatePayload, InitContext, LoopbackModule,
};
use hwm_shared_memory::{
    Lockstep, ReadOnlyMemorySegment, RemoteTriggerClient, SegmentInfo, segment_path,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tempfile::TempDir;

const MODULE: &str = "arm";
const TRIGGER_TIMEOUT: Duration = Duration::from_secs(15);

fn loopback_config(dir: &TempDir, num_dofs: i64) -> ModuleConfig {
    let mut config = ModuleConfig::new(MODULE);
    config.shared_memory_root = dir.path().to_path_buf();
    config
        .module
        .insert("num_dofs".to_string(), toml::Value::Integer(num_dofs));
    config
}

fn client(dir: &TempDir, trigger: &str) -> RemoteTriggerClient {
    RemoteTriggerClient::connect(dir.path(), "", MODULE, trigger).unwrap()
}

/// Controller-side view of `hardware_module_state`.
fn published_state(dir: &TempDir) -> StateCode {
    let path = segment_path(dir.path(), "", MODULE, HARDWARE_MODULE_STATE_INTERFACE_NAME);
    let segment = ReadOnlyMemorySegment::<HardwareModuleStatePayload>::attach(
        &path,
        HARDWARE_MODULE_STATE_INTERFACE_NAME,
    )
    .unwrap();
    segment.value().to_state().code
}

/// Triggers `read_status` in a loop, like a cycling controller.
struct Cycle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Cycle {
    fn start(dir: &TempDir) -> Self {
        let read_status = client(dir, READ_STATUS_TRIGGER);
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let thread = std::thread::spawn(move || {
            while flag.load(Ordering::Acquire) {
                read_status.trigger(Duration::from_secs(1)).unwrap();
            }
        });
        Self {
            running,
            thread: Some(thread),
        }
    }
}

impl Drop for Cycle {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            thread.join().unwrap();
        }
    }
}

#[test]
fn test_lifecycle_through_triggers() {
    let dir = TempDir::new().unwrap();
    let mut runtime =
        HardwareModuleRuntime::create(Box::new(LoopbackModule::new()), loopback_config(&dir, 2))
            .unwrap();
    runtime.run(false, &[]).unwrap();
    assert!(runtime.is_started());
    assert_eq!(published_state(&dir), StateCode::Deactivated);

    client(&dir, ACTIVATE_TRIGGER).trigger(TRIGGER_TIMEOUT).unwrap();
    assert_eq!(published_state(&dir), StateCode::Activated);

    {
        let _cycle = Cycle::start(&dir);
        client(&dir, ENABLE_MOTION_TRIGGER).trigger(TRIGGER_TIMEOUT).unwrap();
        assert_eq!(published_state(&dir), StateCode::MotionEnabled);

        // No controller cycle was ever stamped, so the command is not fresh.
        client(&dir, APPLY_COMMAND_TRIGGER).trigger(TRIGGER_TIMEOUT).unwrap();
        assert_eq!(published_state(&dir), StateCode::Faulted);
        let state = runtime.hardware_module_state();
        assert_eq!(state.message.as_str(), "Cycle count of icon state is inconsistent.");

        client(&dir, CLEAR_FAULTS_TRIGGER).trigger(TRIGGER_TIMEOUT).unwrap();
        assert_eq!(published_state(&dir), StateCode::Activated);

        client(&dir, DISABLE_MOTION_TRIGGER).trigger(TRIGGER_TIMEOUT).unwrap();
        assert_eq!(published_state(&dir), StateCode::Activated);
    }

    client(&dir, DEACTIVATE_TRIGGER).trigger(TRIGGER_TIMEOUT).unwrap();
    assert_eq!(published_state(&dir), StateCode::Deactivated);

    runtime.stop().unwrap();
    assert!(!runtime.is_started());
}

#[test]
fn test_directory_lists_interfaces_and_triggers() {
    let dir = TempDir::new().unwrap();
    let mut runtime =
        HardwareModuleRuntime::create(Box::new(LoopbackModule::new()), loopback_config(&dir, 3))
            .unwrap();
    runtime.run(false, &[]).unwrap();

    let path = segment_path(dir.path(), "", MODULE, MODULE_INFO_NAME);
    let info = ReadOnlyMemorySegment::<SegmentInfo>::attach(&path, MODULE_INFO_NAME).unwrap();
    let names = info.value().names();
    for expected in [
        HARDWARE_MODULE_STATE_INTERFACE_NAME,
        "activate.req",
        "read_status.res",
        "joint_position_command",
        "joint_acceleration_state",
    ] {
        assert!(names.iter().any(|n| n == expected), "missing {expected}");
    }
    assert_eq!(info.value().required_names(), vec!["joint_position_command"]);
    runtime.stop().unwrap();
}

#[test]
fn test_failed_init_is_published() {
    let dir = TempDir::new().unwrap();
    let mut runtime =
        HardwareModuleRuntime::create(Box::new(LoopbackModule::new()), loopback_config(&dir, 0))
            .unwrap();
    assert!(runtime.run(false, &[]).is_err());
    assert!(!runtime.is_started());
    assert!(runtime.callback_handler().is_none());
    assert!(runtime.registry().hardware_info_published());
    assert_eq!(published_state(&dir), StateCode::InitFailed);

    let state = runtime.hardware_module_state();
    assert!(state.message.contains("num_dofs 0"));
    runtime.stop().unwrap();
}

#[test]
fn test_run_twice_is_refused() {
    let dir = TempDir::new().unwrap();
    let mut runtime =
        HardwareModuleRuntime::create(Box::new(LoopbackModule::new()), loopback_config(&dir, 1))
            .unwrap();
    runtime.run(false, &[]).unwrap();
    let err = runtime.run(false, &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
    runtime.stop().unwrap();
}

#[test]
fn test_stop_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let mut runtime =
        HardwareModuleRuntime::create(Box::new(LoopbackModule::new()), loopback_config(&dir, 1))
            .unwrap();
    runtime.run(false, &[]).unwrap();
    runtime.stop().unwrap();
    runtime.stop().unwrap();
}

/// Driver offering one extra service.
#[derive(Default)]
struct CalibratingModule {
    calibrations: Arc<AtomicUsize>,
    shutdowns: Arc<AtomicUsize>,
}

impl HardwareModuleInterface for CalibratingModule {
    fn init(&mut self, context: &mut InitContext<'_>) -> DriverResult {
        let calibrations = Arc::clone(&self.calibrations);
        context.register_service("calibrate", move || {
            calibrations.fetch_add(1, Ordering::SeqCst);
        })?;
        Ok(())
    }

    fn activate(&self) -> DriverResult {
        Ok(())
    }

    fn deactivate(&self) -> DriverResult {
        Ok(())
    }

    fn shutdown(&self) -> DriverResult {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read_status(&self) -> DriverResult {
        Ok(())
    }

    fn apply_command(&self) -> DriverResult {
        Ok(())
    }
}

#[test]
fn test_registered_service_is_served_after_run() {
    let dir = TempDir::new().unwrap();
    let module = CalibratingModule::default();
    let calibrations = Arc::clone(&module.calibrations);
    let shutdowns = Arc::clone(&module.shutdowns);
    let mut config = ModuleConfig::new(MODULE);
    config.shared_memory_root = dir.path().to_path_buf();

    let mut runtime = HardwareModuleRuntime::create(Box::new(module), config).unwrap();
    runtime.run(false, &[]).unwrap();

    client(&dir, "service.calibrate").trigger(TRIGGER_TIMEOUT).unwrap();
    assert_eq!(calibrations.load(Ordering::SeqCst), 1);

    runtime.stop().unwrap();
    assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
}

#[test]
fn test_loopback_drives_realtime_clock() {
    let dir = TempDir::new().unwrap();
    let mut config = loopback_config(&dir, 2);
    config.realtime.drives_realtime_clock = true;
    let mut runtime =
        HardwareModuleRuntime::create(Box::new(LoopbackModule::new()), config).unwrap();
    assert!(runtime.realtime_clock().is_some());
    runtime.run(false, &[]).unwrap();

    let path = segment_path(dir.path(), "", MODULE, REALTIME_CLOCK_NAME);
    let clock = ReadOnlyMemorySegment::<Lockstep>::attach(&path, REALTIME_CLOCK_NAME).unwrap();

    client(&dir, ACTIVATE_TRIGGER).trigger(TRIGGER_TIMEOUT).unwrap();
    clock.value().wait_for_tick(Duration::from_secs(5)).unwrap();
    clock.value().finish_tick().unwrap();
    clock.value().wait_for_tick(Duration::from_secs(5)).unwrap();
    clock.value().finish_tick().unwrap();
    assert!(clock.value().tick_count() >= 2);

    runtime.stop().unwrap();
}
