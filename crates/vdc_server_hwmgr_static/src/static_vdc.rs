// vdcd-rs Source Code File - Virtual Device Controller for digitalSTROM.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Statically configured devices: console key stubs and digital I/O
//! pins, one device per `--consoleio` / `--digitalio` option.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::mpsc;

use vdc_core::dsdefs::{DsButtonElement, DsButtonType, DsGroup, DsOutputFunction};
use vdc_core::errors::VdcApiError;
use vdc_core::ident::{DsUid, Fnv64, OBJECTCLASS_MACADDRESS};
use vdc_core::VdcResult;

use vdc_server::behaviour::{ButtonBehaviour, Channel, ChannelDescriptor, OutputBehaviour};
use vdc_server::device::{Device, OutputDriver};
use vdc_server::vdc::{DeviceNotification, Vdc, VdcCommon, VdcServices};

pub const STATIC_CLASS_ID: &str = "static";

/// Serial base for statically configured devices (bits 48..51 = 7 in the
/// MAC-address class; allocation unconfirmed upstream, see DESIGN notes).
const STATIC_SERIAL_BASE: u64 = 0x7_0000_0000_0000;

/// Direction of a configured I/O device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticIoMode {
  Input,
  Output,
  InputOutput,
}

impl StaticIoMode {
  fn parse(s: &str) -> Option<Self> {
    match s {
      "in" => Some(StaticIoMode::Input),
      "out" => Some(StaticIoMode::Output),
      "io" => Some(StaticIoMode::InputOutput),
      _ => None,
    }
  }

  fn has_input(&self) -> bool {
    matches!(self, StaticIoMode::Input | StaticIoMode::InputOutput)
  }

  fn has_output(&self) -> bool {
    matches!(self, StaticIoMode::Output | StaticIoMode::InputOutput)
  }
}

/// One configured static device, parsed from `<name>:(in|out|io)`.
#[derive(Debug, Clone)]
pub struct StaticDeviceConfig {
  pub name: String,
  pub mode: StaticIoMode,
  /// Console stub or a real digital I/O pin.
  pub console: bool,
}

impl StaticDeviceConfig {
  pub fn parse(spec: &str, console: bool) -> VdcResult<Self> {
    let (name, mode) = spec
      .split_once(':')
      .ok_or_else(|| VdcApiError::InvalidParameter(format!("missing mode in \"{spec}\"")))?;
    let mode = StaticIoMode::parse(mode)
      .ok_or_else(|| VdcApiError::InvalidParameter(format!("invalid mode in \"{spec}\"")))?;
    if !console && mode == StaticIoMode::InputOutput {
      return Err(VdcApiError::InvalidParameter("digital I/O pins are in or out".into()).into());
    }
    Ok(Self {
      name: name.to_owned(),
      mode,
      console,
    })
  }
}

/// Access to one digital output line. The GPIO implementation lives in
/// the engine; tests and console devices use stand-ins.
#[async_trait(?Send)]
pub trait DigitalIo: Send {
  async fn set_state(&mut self, active: bool) -> VdcResult<()>;
}

/// Console "output pin": writes state changes to the log.
struct ConsoleOutput {
  name: String,
}

#[async_trait(?Send)]
impl DigitalIo for ConsoleOutput {
  async fn set_state(&mut self, active: bool) -> VdcResult<()> {
    info!("console output '{}' switched {}", self.name, if active { "on" } else { "off" });
    Ok(())
  }
}

/// Output driver over a digital line: binary threshold at half range.
struct DigitalIoDriver {
  io: Box<dyn DigitalIo>,
}

#[async_trait(?Send)]
impl OutputDriver for DigitalIoDriver {
  async fn apply_channels(&mut self, channels: &mut [Channel]) -> VdcResult<()> {
    if let Some(channel) = channels.first() {
      let descriptor = channel.descriptor();
      let active = channel.cached_value() > (descriptor.max - descriptor.min) / 2.0;
      self.io.set_state(active).await?;
    }
    Ok(())
  }
}

/// An input edge reported from the console key manager or a GPIO
/// watcher: device name plus pressed state.
pub type StaticInputEvent = (String, bool);

pub struct StaticVdc {
  common: VdcCommon,
  devices: HashMap<DsUid, Device>,
  by_name: HashMap<String, DsUid>,
  configs: Vec<StaticDeviceConfig>,
  input_rx: mpsc::Receiver<StaticInputEvent>,
}

impl StaticVdc {
  /// Create the container plus the sender input watchers feed edges into.
  pub fn new(instance: u32, configs: Vec<StaticDeviceConfig>) -> (Self, mpsc::Sender<StaticInputEvent>) {
    let (input_tx, input_rx) = mpsc::channel(64);
    (
      Self {
        common: VdcCommon::new(STATIC_CLASS_ID, instance),
        devices: HashMap::new(),
        by_name: HashMap::new(),
        configs,
        input_rx,
      },
      input_tx,
    )
  }

  fn derive_dsuid(&self, config: &StaticDeviceConfig) -> DsUid {
    let mut hash = Fnv64::new();
    hash.add_bytes(
      format!("{}_{}", self.common.class_id(), self.common.instance()).as_bytes(),
    );
    hash.add_bytes(config.name.as_bytes());
    let mut dsuid = DsUid::new();
    dsuid.set_object_class(OBJECTCLASS_MACADDRESS);
    dsuid.set_serial_no(STATIC_SERIAL_BASE + hash.hash48());
    dsuid
  }

  fn build_device(&self, config: &StaticDeviceConfig) -> Device {
    let dsuid = self.derive_dsuid(config);
    let type_id = if config.console { "console" } else { "digitalio" };
    let mut device = Device::new(
      dsuid,
      STATIC_CLASS_ID,
      type_id,
      if config.mode.has_output() {
        DsGroup::YellowLight
      } else {
        DsGroup::BlackJoker
      },
    );
    device.set_name(&config.name);
    if config.mode.has_input() {
      let mut button = ButtonBehaviour::new(
        0,
        &format!("{} key", config.name),
        if config.mode.has_output() { DsGroup::YellowLight } else { DsGroup::BlackJoker },
      );
      button.set_hardware_config(DsButtonType::Single, DsButtonElement::Center, config.mode.has_output());
      device.add_button(button);
    }
    if config.mode.has_output() {
      let output = OutputBehaviour::new(
        &format!("{} output", config.name),
        DsGroup::YellowLight,
        DsOutputFunction::Dimmer,
        vec![Channel::new(ChannelDescriptor::brightness())],
      );
      device.set_output(output, true);
      device.set_driver(Box::new(DigitalIoDriver {
        io: Box::new(ConsoleOutput {
          name: config.name.clone(),
        }),
      }));
    }
    device
  }
}

#[async_trait(?Send)]
impl Vdc for StaticVdc {
  fn common(&self) -> &VdcCommon {
    &self.common
  }

  fn common_mut(&mut self) -> &mut VdcCommon {
    &mut self.common
  }

  fn device_dsuids(&self) -> Vec<DsUid> {
    self.devices.keys().copied().collect()
  }

  fn device(&self, dsuid: &DsUid) -> Option<&Device> {
    self.devices.get(dsuid)
  }

  fn device_mut(&mut self, dsuid: &DsUid) -> Option<&mut Device> {
    self.devices.get_mut(dsuid)
  }

  /// Static devices are "discovered" from the configuration; collection
  /// is deterministic and never incremental in any meaningful way.
  async fn collect_devices(
    &mut self,
    services: &VdcServices,
    incremental: bool,
    _exhaustive: bool,
    clear_settings: bool,
  ) -> VdcResult<()> {
    if !incremental {
      self.devices.clear();
      self.by_name.clear();
    }
    let configs = self.configs.clone();
    for config in &configs {
      let mut device = self.build_device(config);
      if clear_settings {
        device.forget_settings(services.store())?;
      }
      device.load_settings(services.store(), services.data_dir())?;
      debug!("static device '{}' is {}", config.name, device.dsuid());
      self.by_name.insert(config.name.clone(), *device.dsuid());
      self.devices.insert(*device.dsuid(), device);
    }
    Ok(())
  }

  async fn remove_device(
    &mut self,
    services: &VdcServices,
    dsuid: &DsUid,
    forget: bool,
  ) -> VdcResult<()> {
    if let Some(mut device) = self.devices.remove(dsuid) {
      self.by_name.retain(|_, d| d != dsuid);
      self.configs.retain(|c| c.name != device.name());
      if forget {
        device.forget_settings(services.store())?;
      }
    }
    Ok(())
  }

  async fn service(&mut self, services: &VdcServices) -> Vec<DeviceNotification> {
    let now_ms = services.now_ms();
    let mut notes = Vec::new();
    while let Ok((name, pressed)) = self.input_rx.try_recv() {
      let Some(dsuid) = self.by_name.get(&name).copied() else {
        debug!("input edge for unknown static device '{}'", name);
        continue;
      };
      if let Some(device) = self.devices.get_mut(&dsuid) {
        for push in device.process_button_edge(0, pressed, false, now_ms).await {
          notes.push(DeviceNotification::Push { dsuid, push });
        }
      }
    }
    notes
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use vdc_server::persist::ParamStore;

  fn services(dir: &std::path::Path) -> VdcServices {
    let store = ParamStore::open(dir.join("DsParams.sqlite3")).expect("store opens");
    VdcServices::new(store, dir.to_path_buf())
  }

  #[test]
  fn test_config_parsing() {
    let config = StaticDeviceConfig::parse("k:in", true).expect("parses");
    assert_eq!(config.name, "k");
    assert_eq!(config.mode, StaticIoMode::Input);
    assert!(StaticDeviceConfig::parse("lamp:io", true).is_ok());
    assert!(StaticDeviceConfig::parse("gpio17:io", false).is_err()); // pins are in or out
    assert!(StaticDeviceConfig::parse("nomode", true).is_err());
    assert!(StaticDeviceConfig::parse("x:sideways", true).is_err());
  }

  #[tokio::test]
  async fn test_collect_and_identity_stability() {
    let dir = tempfile::tempdir().expect("tempdir");
    let services = services(dir.path());
    let configs = vec![
      StaticDeviceConfig::parse("k:in", true).expect("parses"),
      StaticDeviceConfig::parse("lamp:out", true).expect("parses"),
    ];
    let (mut vdc, _tx) = StaticVdc::new(1, configs.clone());
    vdc.collect_devices(&services, false, false, false).await.expect("collect");
    assert_eq!(vdc.device_dsuids().len(), 2);
    let first: std::collections::HashSet<String> =
      vdc.device_dsuids().iter().map(DsUid::to_string).collect();
    // identical configuration yields identical identities
    let (mut again, _tx) = StaticVdc::new(1, configs);
    again.collect_devices(&services, false, false, false).await.expect("collect");
    let second: std::collections::HashSet<String> =
      again.device_dsuids().iter().map(DsUid::to_string).collect();
    assert_eq!(first, second);
  }

  #[tokio::test]
  async fn test_console_key_feeds_button_machine() {
    let dir = tempfile::tempdir().expect("tempdir");
    let services = services(dir.path());
    let configs = vec![StaticDeviceConfig::parse("k:in", true).expect("parses")];
    let (mut vdc, tx) = StaticVdc::new(1, configs);
    vdc.collect_devices(&services, false, false, false).await.expect("collect");
    tx.send(("k".to_owned(), true)).await.expect("sends");
    vdc.service(&services).await;
    let dsuid = vdc.device_dsuids()[0];
    assert!(vdc.device(&dsuid).expect("device").buttons[0].machine.is_pressed());
  }

  #[tokio::test]
  async fn test_output_device_has_scenes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let services = services(dir.path());
    let configs = vec![StaticDeviceConfig::parse("lamp:out", true).expect("parses")];
    let (mut vdc, _tx) = StaticVdc::new(1, configs);
    vdc.collect_devices(&services, false, false, false).await.expect("collect");
    let dsuid = vdc.device_dsuids()[0];
    let device = vdc.device_mut(&dsuid).expect("device");
    assert!(device.settings.scene_table.is_some());
    device.call_scene(vdc_core::dsdefs::T0_S1, false).await;
    let value = device.output.as_ref().expect("output").channels()[0].cached_value();
    assert_eq!(value, 100.0);
  }
}
