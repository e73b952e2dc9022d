//! Interface registry.
//!
//! Drivers advertise their state and command records here during `init`.
//! Each advertisement creates one shared memory segment and hands back a
//! typed handle on it. Once the driver is done, the runtime publishes the
//! directory (`hardware_module_info`) so the controller can discover what
//! the module offers.

use crate::error::{HwmError, HwmResult};
use crate::handle::{MutableHandle, MutableStrictHandle, ReadOnlyHandle, StrictHandle};
use crate::interfaces::IconState;
use hwm_common::config::ModuleConfig;
use hwm_common::consts::{ICON_STATE_INTERFACE_NAME, MODULE_INFO_NAME};
use hwm_shared_memory::{SegmentPayload, SharedMemoryManager};
use tracing::{debug, info};

/// Owns the module's shared memory segments.
pub struct HardwareInterfaceRegistry {
    manager: SharedMemoryManager,
    info_published: bool,
}

impl HardwareInterfaceRegistry {
    /// Registry for the module described by `config`.
    ///
    /// Advertises the `icon_state` interface right away; every handle
    /// that checks freshness needs it.
    pub fn create(config: &ModuleConfig) -> HwmResult<Self> {
        if config.name.is_empty() {
            return Err(HwmError::invalid_argument(
                "No name specified in hardware module config.",
            ));
        }
        let mut manager = SharedMemoryManager::create(
            &config.shared_memory_root,
            &config.shared_memory_namespace,
            &config.name,
        )?;
        manager.add_segment(ICON_STATE_INTERFACE_NAME, false, IconState::default())?;
        debug!("Interface registry for module '{}' created", config.name);

        Ok(Self {
            manager,
            info_published: false,
        })
    }

    /// Module name.
    pub fn module_name(&self) -> &str {
        self.manager.module_name()
    }

    /// Shared memory namespace.
    pub fn shared_memory_namespace(&self) -> &str {
        self.manager.namespace()
    }

    /// Underlying segment manager.
    pub fn manager(&self) -> &SharedMemoryManager {
        &self.manager
    }

    pub(crate) fn manager_mut(&mut self) -> &mut SharedMemoryManager {
        &mut self.manager
    }

    /// Names of every advertised interface, in advertisement order.
    pub fn interface_names(&self) -> Vec<String> {
        self.manager.segment_names()
    }

    // ─── Advertising ────────────────────────────────────────────────

    /// Advertise an interface the module reads (typically written by the
    /// controller).
    pub fn advertise_interface<T: SegmentPayload>(
        &mut self,
        name: &str,
        value: T,
    ) -> HwmResult<ReadOnlyHandle<T>> {
        self.add(name, false, value)?;
        self.get_interface_handle(name)
    }

    /// Advertise an interface the module writes.
    pub fn advertise_mutable_interface<T: SegmentPayload>(
        &mut self,
        name: &str,
        value: T,
    ) -> HwmResult<MutableHandle<T>> {
        self.add(name, false, value)?;
        self.get_mutable_interface_handle(name)
    }

    /// Like [`advertise_interface`](Self::advertise_interface), but the
    /// controller must use it and reads are freshness checked.
    pub fn advertise_strict_interface<T: SegmentPayload>(
        &mut self,
        name: &str,
        value: T,
    ) -> HwmResult<StrictHandle<T>> {
        self.add(name, true, value)?;
        Ok(StrictHandle::new(
            self.get_interface_handle(name)?,
            self.icon_state()?,
        ))
    }

    /// Like [`advertise_mutable_interface`](Self::advertise_mutable_interface),
    /// but the controller must use it and reads are freshness checked.
    pub fn advertise_mutable_strict_interface<T: SegmentPayload>(
        &mut self,
        name: &str,
        value: T,
    ) -> HwmResult<MutableStrictHandle<T>> {
        self.add(name, true, value)?;
        Ok(MutableStrictHandle::new(
            self.get_mutable_interface_handle(name)?,
            self.icon_state()?,
        ))
    }

    fn add<T: SegmentPayload>(&mut self, name: &str, must_be_used: bool, value: T) -> HwmResult<()> {
        if self.info_published {
            return Err(HwmError::failed_precondition(format!(
                "Cannot advertise \"{name}\": hardware info already published"
            )));
        }
        if name == MODULE_INFO_NAME {
            return Err(HwmError::invalid_argument(format!(
                "Interface name \"{name}\" is reserved"
            )));
        }
        self.manager.add_segment(name, must_be_used, value)?;
        debug!(
            "Advertised interface '{name}' [{}] must_be_used={must_be_used}",
            T::TYPE_ID
        );
        Ok(())
    }

    // ─── Lookup ─────────────────────────────────────────────────────

    /// Read-only handle on an advertised interface.
    pub fn get_interface_handle<T: SegmentPayload>(&self, name: &str) -> HwmResult<ReadOnlyHandle<T>> {
        Ok(ReadOnlyHandle::new(self.manager.get::<T>(name)?))
    }

    /// Read-write handle on an advertised interface.
    ///
    /// Fails with `AlreadyExists` while another read-write handle on the
    /// same interface is alive.
    pub fn get_mutable_interface_handle<T: SegmentPayload>(
        &self,
        name: &str,
    ) -> HwmResult<MutableHandle<T>> {
        Ok(MutableHandle::new(self.manager.get_mut::<T>(name)?))
    }

    /// Handle on the controller's `icon_state` interface.
    pub fn icon_state(&self) -> HwmResult<ReadOnlyHandle<IconState>> {
        self.get_interface_handle(ICON_STATE_INTERFACE_NAME)
    }

    // ─── Directory ──────────────────────────────────────────────────

    /// Publish the directory of all advertised interfaces.
    ///
    /// Interfaces advertised afterwards would be missing from the
    /// directory, so further advertisements are refused.
    pub fn advertise_hardware_info(&mut self) -> HwmResult<()> {
        if self.info_published {
            return Err(HwmError::new(
                crate::error::ErrorKind::AlreadyExists,
                "Hardware info already published",
            ));
        }
        let info = self.manager.segment_info()?;
        let count = info.len();
        self.manager.add_segment(MODULE_INFO_NAME, false, info)?;
        self.info_published = true;
        info!(
            "Published hardware info of module '{}' ({count} interfaces)",
            self.module_name()
        );
        Ok(())
    }

    /// Whether [`advertise_hardware_info`](Self::advertise_hardware_info) ran.
    pub fn hardware_info_published(&self) -> bool {
        self.info_published
    }
}
