// vdcd-rs Source Code File - Virtual Device Controller for digitalSTROM.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The device class container (Vdc) trait.
//!
//! One Vdc exists per device technology (DALI, EnOcean, static devices).
//! It discovers devices, owns them for their lifetime, persists the
//! learned-in list in its own per-technology store and forwards
//! lifecycle events to the host. The host addresses devices through the
//! container, never the other way around: children only know their
//! container's class id.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use once_cell::sync::Lazy;

use vdc_core::ident::{DsUid, VDC_NAMESPACE_UUID};
use vdc_core::VdcResult;

use crate::device::{Device, DevicePush};
use crate::persist::ParamStore;

static VDC_NAMESPACE: Lazy<DsUid> =
  Lazy::new(|| VDC_NAMESPACE_UUID.parse().expect("namespace UUID literal is valid"));

/// Shared services every Vdc gets from the host: the common device
/// settings store and the data directory (per-technology SQLite files,
/// scene override CSVs).
pub struct VdcServices {
  store: ParamStore,
  data_dir: PathBuf,
  start: std::time::Instant,
}

impl VdcServices {
  pub fn new(store: ParamStore, data_dir: PathBuf) -> Self {
    Self {
      store,
      data_dir,
      start: std::time::Instant::now(),
    }
  }

  /// Monotonic milliseconds since host start; the shared clock for
  /// button state machines.
  pub fn now_ms(&self) -> u64 {
    self.start.elapsed().as_millis() as u64
  }

  pub fn store(&self) -> &ParamStore {
    &self.store
  }

  pub fn data_dir(&self) -> &Path {
    &self.data_dir
  }

  /// Path of the per-technology SQLite file of a container.
  pub fn tech_store_path(&self, class_id: &str, instance: u32) -> PathBuf {
    self.data_dir.join(format!("{class_id}_{instance}.sqlite3"))
  }
}

/// State common to all containers.
pub struct VdcCommon {
  class_id: &'static str,
  instance: u32,
  dsuid: DsUid,
  learning: bool,
}

impl VdcCommon {
  pub fn new(class_id: &'static str, instance: u32) -> Self {
    let dsuid = DsUid::name_in_space(&format!("{class_id}.{instance}"), &VDC_NAMESPACE);
    Self {
      class_id,
      instance,
      dsuid,
      learning: false,
    }
  }

  pub fn class_id(&self) -> &'static str {
    self.class_id
  }

  pub fn instance(&self) -> u32 {
    self.instance
  }

  pub fn dsuid(&self) -> &DsUid {
    &self.dsuid
  }

  pub fn learning(&self) -> bool {
    self.learning
  }

  pub fn set_learning(&mut self, learning: bool) {
    self.learning = learning;
  }
}

/// Events a container reports to the host after servicing its hardware.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceNotification {
  /// A device wants a state change pushed upstream.
  Push { dsuid: DsUid, push: DevicePush },
  /// A new device appeared (learn-in); the host must index and announce it.
  Appeared { dsuid: DsUid },
  /// A device is gone (learn-out); the host must drop it and send vanish.
  Vanished { dsuid: DsUid },
}

/// A device technology container.
#[async_trait(?Send)]
pub trait Vdc: Send {
  fn common(&self) -> &VdcCommon;
  fn common_mut(&mut self) -> &mut VdcCommon;

  fn class_id(&self) -> &'static str {
    self.common().class_id()
  }

  fn dsuid(&self) -> DsUid {
    *self.common().dsuid()
  }

  fn device_dsuids(&self) -> Vec<DsUid>;
  fn device(&self, dsuid: &DsUid) -> Option<&Device>;
  fn device_mut(&mut self, dsuid: &DsUid) -> Option<&mut Device>;

  /// Discover devices. Non-incremental collection forgets the in-memory
  /// list first (and optionally the persisted settings); previously
  /// learned-in devices are reconstructed without a new teach-in.
  async fn collect_devices(
    &mut self,
    services: &VdcServices,
    incremental: bool,
    exhaustive: bool,
    clear_settings: bool,
  ) -> VdcResult<()>;

  /// Drop a device from the container. With `forget`, its settings rows
  /// and the learned-in record are deleted too.
  async fn remove_device(
    &mut self,
    services: &VdcServices,
    dsuid: &DsUid,
    forget: bool,
  ) -> VdcResult<()>;

  /// Enable/disable learn-in mode (technologies without teach-in ignore it).
  fn set_learn_mode(&mut self, enabled: bool) {
    self.common_mut().set_learning(enabled);
  }

  /// Drain pending hardware input, updating devices. Called by the host
  /// whenever the technology signalled activity.
  async fn service(&mut self, _services: &VdcServices) -> Vec<DeviceNotification> {
    Vec::new()
  }
}
