//! Lifecycle glue between the trigger threads, the cycle thread and the driver.
//!
//! # Who writes the state
//!
//! | Caller | Path | Why it may write |
//! |---|---|---|
//! | `activate`, `prepare` trigger | direct | the controller is not cycling yet |
//! | `deactivate` trigger | direct | the controller stopped cycling |
//! | `enable_motion`, `disable_motion`, `clear_faults` | queued request | the controller is cycling |
//! | `read_status`, `apply_command` (cycle thread) | direct | it owns the state while cycling |
//!
//! Queued requests are applied by the cycle thread at the start of
//! `read_status`, at most one per cycle.

use crate::error::{HwmError, HwmResult};
use crate::module::{DriverError, DriverResult, HardwareModuleInterface};
use crate::request::{CancelReason, RequestOutcome, RequestQueue};
use crate::state_guard::{TransitionKind, classify};
use crate::state_mirror::StateMirror;
use hwm_common::consts::REQUEST_TIMEOUT;
use hwm_common::state::{HardwareModuleState, StateCode, fault_message};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Fault message used when the controller applies commands too early.
pub const APPLY_COMMAND_NOT_ENABLED: &str = "'ApplyCommand' called while not enabled.";

/// Per-module lifecycle handler shared by all trigger threads.
pub struct CallbackHandler {
    module: Arc<dyn HardwareModuleInterface>,
    state: Arc<StateMirror>,
    requests: RequestQueue,
    /// Serializes the blocking actions.
    action_lock: Mutex<()>,
    request_timeout: Duration,
}

impl CallbackHandler {
    /// Handler driving `module` and publishing through `state`.
    pub fn new(module: Arc<dyn HardwareModuleInterface>, state: Arc<StateMirror>) -> Self {
        Self {
            module,
            state,
            requests: RequestQueue::new(),
            action_lock: Mutex::new(()),
            request_timeout: REQUEST_TIMEOUT,
        }
    }

    /// Builder: wait at most `timeout` for a queued request.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    // ─── Direct transitions ─────────────────────────────────────────

    /// `prepare` trigger.
    pub fn on_prepare(&self) {
        let _action = self.action_lock.lock();
        if !self.set_state_directly(StateCode::Preparing, "", false, false) {
            return;
        }
        match self.module.prepare() {
            Ok(()) => {
                self.set_state_directly(StateCode::Prepared, "", false, false);
            }
            Err(e) => self.fail_directly("Prepare", &e),
        }
    }

    /// `activate` trigger.
    pub fn on_activate(&self) {
        if !self.set_state_directly(StateCode::Activating, "", false, false) {
            return;
        }
        self.requests.cancel_all(CancelReason::Activation);
        match self.module.activate() {
            Ok(()) => {
                self.set_state_directly(StateCode::Activated, "", false, false);
            }
            Err(e) => self.fail_directly("Activate", &e),
        }
        self.requests.set_reject_new(false);
    }

    /// `deactivate` trigger.
    ///
    /// An action blocked on a queued request is released with a
    /// cancellation; one that submits concurrently is refused.
    pub fn on_deactivate(&self) {
        if !self.set_state_directly(StateCode::Deactivating, "", false, false) {
            return;
        }
        self.requests.set_reject_new(true);
        self.requests.cancel_all(CancelReason::Deactivation);
        match self.module.deactivate() {
            Ok(()) => {
                self.set_state_directly(StateCode::Deactivated, "", false, false);
            }
            Err(e) => self.fail_directly("Deactivate", &e),
        }
    }

    fn fail_directly(&self, action: &str, e: &DriverError) {
        error!("Call to '{action}' failed: {e}");
        self.set_state_directly(e.severity.state(), &e.message, false, false);
    }

    // ─── Queued transitions ─────────────────────────────────────────

    /// `enable_motion` trigger.
    pub fn on_enable_motion(&self) -> HwmResult<()> {
        self.run_action(
            "EnableMotion",
            StateCode::MotionEnabling,
            StateCode::MotionEnabled,
            || self.module.enable_motion(),
        )
    }

    /// `disable_motion` trigger.
    pub fn on_disable_motion(&self) -> HwmResult<()> {
        info!("'DisableMotion' called.");
        self.run_action(
            "DisableMotion",
            StateCode::MotionDisabling,
            StateCode::Activated,
            || self.module.disable_motion(),
        )
    }

    /// `clear_faults` trigger.
    pub fn on_clear_faults(&self) -> HwmResult<()> {
        self.run_action(
            "ClearFaults",
            StateCode::ClearingFaults,
            StateCode::Activated,
            || self.module.clear_faults(),
        )
    }

    /// Move to `intermediate`, run `callback`, then move to `target` or to
    /// the fault state the callback reports.
    ///
    /// A no-op first transition skips the callback and succeeds.
    fn run_action<F>(
        &self,
        action: &str,
        intermediate: StateCode,
        target: StateCode,
        callback: F,
    ) -> HwmResult<()>
    where
        F: FnOnce() -> DriverResult,
    {
        let _action = self.action_lock.lock();
        let current = self.current_state_code();
        if !self.set_state_and_wait(current, intermediate, "")? {
            return Ok(());
        }
        match callback() {
            Ok(()) => {
                self.set_state_and_wait(intermediate, target, "")?;
                Ok(())
            }
            Err(e) => {
                error!("Call to '{action}' failed: {e}");
                self.set_state_and_wait(intermediate, e.severity.state(), &e.message)?;
                Err(e.into())
            }
        }
    }

    /// Queue `from → to` for the cycle thread and wait until it was applied.
    ///
    /// Returns `Ok(false)` for a no-op transition without queueing anything.
    fn set_state_and_wait(&self, from: StateCode, to: StateCode, message: &str) -> HwmResult<bool> {
        match classify(from, to) {
            TransitionKind::Allowed => {}
            TransitionKind::NoOp => return Ok(false),
            TransitionKind::Prohibited => {
                error!("Switching from {from} to {to} is prohibited!");
                return Err(HwmError::failed_precondition(format!(
                    "Transition from {from} to {to} is prohibited!"
                )));
            }
        }

        let result = self
            .requests
            .submit(from, to, fault_message(message), self.state.now_ns())
            .and_then(|ticket| self.requests.wait(ticket, self.request_timeout));
        match result {
            Ok(()) => Ok(true),
            Err(e) => {
                error!("State change request to {to} failed: {}", e.message());
                Err(e)
            }
        }
    }

    // ─── Cycle thread ───────────────────────────────────────────────

    /// `read_status` trigger, once per cycle before `apply_command`.
    pub fn on_read_status(&self) {
        self.process_next_pending_request();

        if let Err(e) = self.module.read_status() {
            if self.current_state_code() == StateCode::ClearingFaults {
                return;
            }
            if self.set_state_directly(e.severity.state(), &e.message, false, true) {
                error!("Call to 'ReadStatus' failed: {e}");
                self.requests.try_cancel_all(CancelReason::ReadStatusError);
            }
        }
    }

    /// `apply_command` trigger, once per cycle while motion is enabled.
    pub fn on_apply_command(&self) {
        if self.current_state_code() != StateCode::MotionEnabled {
            if self.set_state_directly(StateCode::Faulted, APPLY_COMMAND_NOT_ENABLED, false, true) {
                warn!("{APPLY_COMMAND_NOT_ENABLED}");
                self.requests.try_cancel_all(CancelReason::ApplyCommandError);
            }
            return;
        }

        if let Err(e) = self.module.apply_command() {
            if self.set_state_directly(e.severity.state(), &e.message, false, true) {
                error!("Call to 'ApplyCommand' failed: {e}");
                self.requests.try_cancel_all(CancelReason::ApplyCommandError);
            }
        }
    }

    /// Apply or cancel the newest queued request. Requests older than the
    /// last state change, or whose `from` no longer matches, are cancelled.
    fn process_next_pending_request(&self) {
        let Some(request) = self.requests.try_pop_newest() else {
            return;
        };
        if !self.requests.claim(&request) {
            return;
        }

        let current = self.current_state_code();
        let outcome = if request.timestamp_ns >= self.state.update_time_ns() && request.from == current
        {
            if self
                .state
                .set_state_directly(request.to, &request.message, false, true)
            {
                RequestOutcome::Applied
            } else {
                RequestOutcome::Prohibited {
                    from: current,
                    to: request.to,
                }
            }
        } else {
            RequestOutcome::Cancelled(CancelReason::NewerRequest)
        };
        self.requests.resolve(&request, outcome);
    }

    // ─── State access ───────────────────────────────────────────────

    /// See [`StateMirror::set_state_directly`]. Only call where no other
    /// thread can be writing the state (see the module docs).
    pub fn set_state_directly(&self, state: StateCode, message: &str, force: bool, silent: bool) -> bool {
        self.state.set_state_directly(state, message, force, silent)
    }

    /// Force `state`, bypassing the guard.
    pub fn set_state_test_only(&self, state: StateCode) {
        self.state.set_state_directly(state, "", true, false);
    }

    /// Latest published state, for non-realtime callers.
    pub fn hardware_module_state(&self) -> HardwareModuleState {
        self.state.hardware_module_state()
    }

    /// Current state code. Lock-free.
    pub fn current_state_code(&self) -> StateCode {
        self.state.current_state_code()
    }

    /// Number of queued requests.
    pub fn pending_requests(&self) -> usize {
        self.requests.len()
    }

    /// Refuse new requests and cancel the queued ones.
    pub fn shutdown(&self) {
        self.requests.set_reject_new(true);
        self.requests.cancel_all(CancelReason::Shutdown);
    }
}

impl Drop for CallbackHandler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::registry::HardwareInterfaceRegistry;
    use hwm_common::config::ModuleConfig;
    use hwm_common::state::FaultMessage;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Driver whose callbacks fail on demand.
    #[derive(Default)]
    struct ScriptedModule {
        fail_activate: Mutex<Option<DriverError>>,
        fail_enable: Mutex<Option<DriverError>>,
        fail_read_status: Mutex<Option<DriverError>>,
        fail_apply_command: Mutex<Option<DriverError>>,
        enable_calls: AtomicUsize,
        apply_calls: AtomicUsize,
        clear_calls: AtomicUsize,
    }

    impl HardwareModuleInterface for ScriptedModule {
        fn activate(&self) -> DriverResult {
            self.fail_activate.lock().take().map_or(Ok(()), Err)
        }

        fn deactivate(&self) -> DriverResult {
            Ok(())
        }

        fn enable_motion(&self) -> DriverResult {
            self.enable_calls.fetch_add(1, Ordering::SeqCst);
            self.fail_enable.lock().take().map_or(Ok(()), Err)
        }

        fn clear_faults(&self) -> DriverResult {
            self.clear_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn read_status(&self) -> DriverResult {
            self.fail_read_status.lock().clone().map_or(Ok(()), Err)
        }

        fn apply_command(&self) -> DriverResult {
            self.apply_calls.fetch_add(1, Ordering::SeqCst);
            self.fail_apply_command.lock().take().map_or(Ok(()), Err)
        }
    }

    struct Fixture {
        _dir: TempDir,
        _registry: HardwareInterfaceRegistry,
        module: Arc<ScriptedModule>,
        handler: Arc<CallbackHandler>,
    }

    fn fixture(timeout: Duration) -> Fixture {
        let dir = TempDir::new().unwrap();
        let mut config = ModuleConfig::new("scripted");
        config.shared_memory_root = dir.path().to_path_buf();
        let mut registry = HardwareInterfaceRegistry::create(&config).unwrap();
        let state = Arc::new(StateMirror::create(&mut registry).unwrap());
        let module = Arc::new(ScriptedModule::default());
        let handler = Arc::new(
            CallbackHandler::new(module.clone(), state).with_request_timeout(timeout),
        );
        Fixture {
            _dir: dir,
            _registry: registry,
            module,
            handler,
        }
    }

    /// Calls `on_read_status` every millisecond like a controller would.
    struct Cycle {
        running: Arc<AtomicBool>,
        thread: Option<std::thread::JoinHandle<()>>,
    }

    impl Cycle {
        fn start(handler: &Arc<CallbackHandler>) -> Self {
            let running = Arc::new(AtomicBool::new(true));
            let thread = {
                let running = Arc::clone(&running);
                let handler = Arc::clone(handler);
                std::thread::spawn(move || {
                    while running.load(Ordering::Acquire) {
                        handler.on_read_status();
                        std::thread::sleep(Duration::from_millis(1));
                    }
                })
            };
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

    fn wait_for_pending(handler: &CallbackHandler, count: usize) {
        for _ in 0..5_000 {
            if handler.pending_requests() == count {
                return;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("expected {count} pending requests");
    }

    #[test]
    fn activate_then_deactivate() {
        let f = fixture(REQUEST_TIMEOUT);
        f.handler.on_activate();
        assert_eq!(f.handler.current_state_code(), StateCode::Activated);
        f.handler.on_deactivate();
        assert_eq!(f.handler.current_state_code(), StateCode::Deactivated);
    }

    #[test]
    fn activate_failure_faults() {
        let f = fixture(REQUEST_TIMEOUT);
        *f.module.fail_activate.lock() = Some(DriverError::fault("bus down"));
        f.handler.on_activate();
        let state = f.handler.hardware_module_state();
        assert_eq!(state.code, StateCode::Faulted);
        assert_eq!(state.message.as_str(), "bus down");
    }

    #[test]
    fn fatal_activate_failure_is_terminal() {
        let f = fixture(REQUEST_TIMEOUT);
        *f.module.fail_activate.lock() = Some(DriverError::fatal("power stage destroyed"));
        f.handler.on_activate();
        assert_eq!(f.handler.current_state_code(), StateCode::FatallyFaulted);
        f.handler.on_activate();
        assert_eq!(f.handler.current_state_code(), StateCode::FatallyFaulted);
    }

    #[test]
    fn activate_while_active_is_ignored() {
        let f = fixture(REQUEST_TIMEOUT);
        f.handler.on_activate();
        f.handler.on_activate();
        assert_eq!(f.handler.current_state_code(), StateCode::Activated);
    }

    #[test]
    fn prepare_precedes_activation() {
        let f = fixture(REQUEST_TIMEOUT);
        f.handler.on_prepare();
        assert_eq!(f.handler.current_state_code(), StateCode::Prepared);
        f.handler.on_activate();
        assert_eq!(f.handler.current_state_code(), StateCode::Activated);
    }

    #[test]
    fn enable_fault_and_clear() {
        let f = fixture(REQUEST_TIMEOUT);
        f.handler.on_activate();
        let _cycle = Cycle::start(&f.handler);

        f.handler.on_enable_motion().unwrap();
        assert_eq!(f.handler.current_state_code(), StateCode::MotionEnabled);

        *f.module.fail_apply_command.lock() = Some(DriverError::fault("following error"));
        f.handler.on_apply_command();
        let state = f.handler.hardware_module_state();
        assert_eq!(state.code, StateCode::Faulted);
        assert_eq!(state.message.as_str(), "following error");

        f.handler.on_clear_faults().unwrap();
        assert_eq!(f.handler.current_state_code(), StateCode::Activated);
        assert_eq!(f.module.clear_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn disable_motion_returns_to_activated() {
        let f = fixture(REQUEST_TIMEOUT);
        f.handler.on_activate();
        let _cycle = Cycle::start(&f.handler);
        f.handler.on_enable_motion().unwrap();
        f.handler.on_disable_motion().unwrap();
        assert_eq!(f.handler.current_state_code(), StateCode::Activated);

        // Already disabled: no request, no error.
        f.handler.on_disable_motion().unwrap();
        assert_eq!(f.handler.current_state_code(), StateCode::Activated);
    }

    #[test]
    fn enable_failure_reports_error_and_faults() {
        let f = fixture(REQUEST_TIMEOUT);
        f.handler.on_activate();
        let _cycle = Cycle::start(&f.handler);
        *f.module.fail_enable.lock() = Some(DriverError::fault("brake stuck"));

        let err = f.handler.on_enable_motion().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
        assert_eq!(f.handler.current_state_code(), StateCode::Faulted);
        assert_eq!(f.handler.hardware_module_state().message.as_str(), "brake stuck");
    }

    #[test]
    fn enable_from_deactivated_is_prohibited() {
        let f = fixture(REQUEST_TIMEOUT);
        let err = f.handler.on_enable_motion().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
        assert_eq!(
            err.message(),
            "Transition from Deactivated to MotionEnabling is prohibited!"
        );
        assert_eq!(f.module.enable_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn apply_command_while_not_enabled_faults_without_driver_call() {
        let f = fixture(REQUEST_TIMEOUT);
        f.handler.on_activate();
        f.handler.on_apply_command();

        let state = f.handler.hardware_module_state();
        assert_eq!(state.code, StateCode::Faulted);
        assert_eq!(state.message.as_str(), APPLY_COMMAND_NOT_ENABLED);
        assert_eq!(f.module.apply_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn read_status_failure_faults_once() {
        let f = fixture(REQUEST_TIMEOUT);
        f.handler.on_activate();
        *f.module.fail_read_status.lock() = Some(DriverError::fault("sensor timeout"));
        f.handler.on_read_status();
        f.handler.on_read_status();
        assert_eq!(f.handler.current_state_code(), StateCode::Faulted);
        assert_eq!(
            f.handler.hardware_module_state().message.as_str(),
            "sensor timeout"
        );
    }

    #[test]
    fn read_status_failure_while_clearing_faults_keeps_state() {
        let f = fixture(REQUEST_TIMEOUT);
        f.handler.set_state_test_only(StateCode::ClearingFaults);
        *f.module.fail_read_status.lock() = Some(DriverError::fault("still faulty"));
        f.handler.on_read_status();
        assert_eq!(f.handler.current_state_code(), StateCode::ClearingFaults);
    }

    #[test]
    fn deactivate_cancels_queued_enable() {
        let f = fixture(REQUEST_TIMEOUT);
        f.handler.on_activate();

        let enabling = {
            let handler = Arc::clone(&f.handler);
            std::thread::spawn(move || handler.on_enable_motion())
        };
        wait_for_pending(&f.handler, 1);
        f.handler.on_deactivate();

        let err = enabling.join().unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(err.message(), "Request cancelled due to deactivation");
        assert_eq!(f.handler.current_state_code(), StateCode::Deactivated);
        assert_eq!(f.module.enable_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn requests_are_refused_after_deactivation_until_activation() {
        let f = fixture(REQUEST_TIMEOUT);
        f.handler.on_activate();
        f.handler.on_deactivate();
        f.handler.set_state_test_only(StateCode::Activated);

        let err = f.handler.on_enable_motion().unwrap_err();
        assert_eq!(err.message(), "Request cancelled due to deactivation");

        f.handler.set_state_test_only(StateCode::Deactivated);
        f.handler.on_activate();
        let _cycle = Cycle::start(&f.handler);
        f.handler.on_enable_motion().unwrap();
    }

    #[test]
    fn newest_queued_request_wins() {
        let f = fixture(REQUEST_TIMEOUT);
        f.handler.on_activate();
        let now = f.handler.state.now_ns();
        let older = f
            .handler
            .requests
            .submit(StateCode::Activated, StateCode::MotionEnabling, FaultMessage::new(), now)
            .unwrap();
        let newer = f
            .handler
            .requests
            .submit(StateCode::Activated, StateCode::Faulted, fault_message("newest"), now + 1)
            .unwrap();

        f.handler.on_read_status();

        let err = f.handler.requests.wait(older, Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.message(), "Request cancelled due to newer request");
        f.handler.requests.wait(newer, Duration::from_secs(1)).unwrap();
        assert_eq!(f.handler.current_state_code(), StateCode::Faulted);
    }

    #[test]
    fn request_older_than_last_change_is_cancelled() {
        let f = fixture(REQUEST_TIMEOUT);
        f.handler.on_activate();
        let ticket = f
            .handler
            .requests
            .submit(StateCode::Activated, StateCode::MotionEnabling, FaultMessage::new(), 0)
            .unwrap();

        f.handler.on_read_status();

        let err = f.handler.requests.wait(ticket, Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(f.handler.current_state_code(), StateCode::Activated);
    }

    #[test]
    fn timed_out_request_is_never_applied() {
        let f = fixture(Duration::from_millis(20));
        f.handler.on_activate();

        let err = f.handler.on_enable_motion().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);

        f.handler.on_read_status();
        assert_eq!(f.handler.current_state_code(), StateCode::Activated);
        assert_eq!(f.handler.pending_requests(), 0);
        assert_eq!(f.handler.requests.slots_in_use(), 0);
        assert_eq!(f.module.enable_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn shutdown_cancels_and_refuses() {
        let f = fixture(REQUEST_TIMEOUT);
        f.handler.on_activate();
        let enabling = {
            let handler = Arc::clone(&f.handler);
            std::thread::spawn(move || handler.on_enable_motion())
        };
        wait_for_pending(&f.handler, 1);
        f.handler.shutdown();

        let err = enabling.join().unwrap().unwrap_err();
        assert_eq!(err.message(), "Request cancelled due to shutdown");
        assert!(f.handler.on_clear_faults().is_ok());
        f.handler.set_state_test_only(StateCode::Faulted);
        assert_eq!(
            f.handler.on_clear_faults().unwrap_err().message(),
            "Request cancelled due to deactivation"
        );
    }
}
