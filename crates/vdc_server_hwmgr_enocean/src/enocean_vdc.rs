// vdcd-rs Source Code File - Virtual Device Controller for digitalSTROM.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The EnOcean device class container.
//!
//! Radio packets arrive from a reader task feeding the container's
//! packet queue; the host wakes the container which then either handles
//! teach-in/teach-out (learning mode) or dispatches the packet to the
//! channel handlers of every logical device paired for the sender
//! address. Pairings persist in the `knownDevices` table of the
//! container's own store, so collection re-creates devices without a new
//! teach-in.

use std::collections::HashMap;

use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::Row;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use vdc_core::dsdefs::{DsBinaryInputType, DsButtonElement, DsButtonType, DsGroup};
use vdc_core::errors::VdcDeviceError;
use vdc_core::ident::{DsUid, ENOCEAN_NAMESPACE_UUID};
use vdc_core::VdcResult;

use vdc_server::behaviour::{BinaryInputBehaviour, ButtonBehaviour, SensorBehaviour};
use vdc_server::device::Device;
use vdc_server::host::HostEvent;
use vdc_server::persist::{db_err, FieldDef, FieldType, ParamStore, PersistedParams};
use vdc_server::vdc::{DeviceNotification, Vdc, VdcCommon, VdcServices};

use crate::eep;
use crate::esp3::{rorg, Esp3Packet, PacketType};
use crate::handlers::{descriptors_for, ChannelHandler, FourBsTarget};
use crate::{EnoceanAddress, EnoceanManufacturer, EnoceanProfile, EnoceanSubDevice};

pub const ENOCEAN_CLASS_ID: &str = "enocean";

/// Byte port to the EnOcean modem. Concrete transports (serial bridge,
/// TCP) live outside the core; only the byte stream contract matters
/// here.
#[async_trait]
pub trait EnoceanPort: Send {
  async fn read_bytes(&mut self, buf: &mut [u8]) -> VdcResult<usize>;
  async fn write_bytes(&mut self, bytes: &[u8]) -> VdcResult<()>;
}

/// Spawn the modem reader: scans the byte stream into ESP3 packets,
/// queues radio packets for the container and wakes the host. The task
/// ends when the cancellation token fires (host shutdown) or the port
/// dies.
pub fn spawn_port_reader(
  mut port: Box<dyn EnoceanPort>,
  packets: mpsc::Sender<Esp3Packet>,
  wake: mpsc::Sender<HostEvent>,
  cancellation: CancellationToken,
) {
  vdc_core::util::async_manager::spawn(async move {
    let mut scanner = Esp3Packet::new();
    let mut buf = [0u8; 256];
    loop {
      let read = tokio::select! {
        read = port.read_bytes(&mut buf) => read,
        _ = cancellation.cancelled() => {
          debug!("EnOcean port reader cancelled, exiting");
          return;
        }
      };
      let n = match read {
        Ok(0) => {
          info!("EnOcean port closed");
          return;
        }
        Ok(n) => n,
        Err(e) => {
          // transport errors end the reader; the scanner state dies with
          // it, a reconnect starts clean
          warn!("EnOcean port read failed: {}", e);
          return;
        }
      };
      let mut offset = 0;
      while offset < n {
        offset += scanner.accept_bytes(&buf[offset..n]);
        if scanner.is_complete() {
          let packet = std::mem::take(&mut scanner);
          if packets.send(packet).await.is_err() {
            return;
          }
          if wake.send(HostEvent::Hardware).await.is_err() {
            return;
          }
        }
      }
    }
  });
}

/// One row of the `knownDevices` pairing table.
#[derive(Debug, Clone, Default)]
struct KnownDeviceRow {
  row_id: i64,
  dirty: bool,
  address: EnoceanAddress,
  subdevice: EnoceanSubDevice,
  profile: EnoceanProfile,
  manufacturer: EnoceanManufacturer,
}

const KNOWN_DEVICE_FIELDS: [FieldDef; 4] = [
  FieldDef::new("enoceanAddress", FieldType::Integer),
  FieldDef::new("subdevice", FieldType::Integer),
  FieldDef::new("eeProfile", FieldType::Integer),
  FieldDef::new("eeManufacturer", FieldType::Integer),
];

/// All rows share one parent: the container itself.
const KNOWN_DEVICES_PARENT: &str = "enocean";

impl PersistedParams for KnownDeviceRow {
  fn table_name(&self) -> &'static str {
    "knownDevices"
  }

  fn field_defs(&self) -> &'static [FieldDef] {
    &KNOWN_DEVICE_FIELDS
  }

  fn row_id(&self) -> i64 {
    self.row_id
  }

  fn set_row_id(&mut self, row_id: i64) {
    self.row_id = row_id;
  }

  fn dirty(&self) -> bool {
    self.dirty
  }

  fn set_dirty(&mut self, dirty: bool) {
    self.dirty = dirty;
  }

  fn load_from_row(&mut self, row: &Row, index: &mut usize) -> VdcResult<()> {
    let address: i64 = row.get(*index).map_err(db_err)?;
    *index += 1;
    let subdevice: i64 = row.get(*index).map_err(db_err)?;
    *index += 1;
    let profile: i64 = row.get(*index).map_err(db_err)?;
    *index += 1;
    let manufacturer: i64 = row.get(*index).map_err(db_err)?;
    *index += 1;
    self.address = address as EnoceanAddress;
    self.subdevice = subdevice as EnoceanSubDevice;
    self.profile = profile as EnoceanProfile;
    self.manufacturer = manufacturer as EnoceanManufacturer;
    Ok(())
  }

  fn field_values(&self) -> Vec<SqlValue> {
    vec![
      SqlValue::Integer(self.address as i64),
      SqlValue::Integer(self.subdevice as i64),
      SqlValue::Integer(self.profile as i64),
      SqlValue::Integer(self.manufacturer as i64),
    ]
  }
}

struct EnoceanDeviceEntry {
  device: Device,
  handlers: Vec<ChannelHandler>,
  known: KnownDeviceRow,
}

/// Derive the stable device identity from address and subdevice index,
/// hashed into the EnOcean name space.
fn enocean_dsuid(address: EnoceanAddress, subdevice: EnoceanSubDevice) -> DsUid {
  let namespace: DsUid = ENOCEAN_NAMESPACE_UUID
    .parse()
    .expect("namespace UUID literal is valid");
  DsUid::name_in_space(&format!("{address:08X}_{subdevice}"), &namespace)
}

pub struct EnoceanVdc {
  common: VdcCommon,
  devices: HashMap<DsUid, EnoceanDeviceEntry>,
  by_address: HashMap<EnoceanAddress, Vec<DsUid>>,
  packet_rx: mpsc::Receiver<Esp3Packet>,
  tech_store: Option<ParamStore>,
}

impl EnoceanVdc {
  /// Create the container plus the sender the port reader feeds packets
  /// into.
  pub fn new(instance: u32) -> (Self, mpsc::Sender<Esp3Packet>) {
    let (packet_tx, packet_rx) = mpsc::channel(64);
    (
      Self {
        common: VdcCommon::new(ENOCEAN_CLASS_ID, instance),
        devices: HashMap::new(),
        by_address: HashMap::new(),
        packet_rx,
        tech_store: None,
      },
      packet_tx,
    )
  }

  fn ensure_tech_store(&mut self, services: &VdcServices) -> VdcResult<&ParamStore> {
    if self.tech_store.is_none() {
      let path = services.tech_store_path(self.common.class_id(), self.common.instance());
      self.tech_store = Some(ParamStore::open(path)?);
    }
    Ok(self.tech_store.as_ref().expect("just opened"))
  }

  /// Build the logical devices for a learned-in module.
  fn entries_for_profile(
    address: EnoceanAddress,
    profile: EnoceanProfile,
    manufacturer: EnoceanManufacturer,
  ) -> Vec<EnoceanDeviceEntry> {
    let mut entries = Vec::new();
    let rorg_byte = eep::profile_rorg(profile);
    let func = eep::profile_func(profile);
    let eep_type = eep::profile_type(profile);
    match rorg_byte {
      rorg::RPS => match func {
        0x02 | 0x03 => {
          // 2- or 4-rocker: one logical device per rocker, each with a
          // down and an up key
          let num_rockers = if func == 0x03 { 4 } else { 2 };
          for subdevice in 0..num_rockers {
            let mut device = Device::new(
              enocean_dsuid(address, subdevice),
              ENOCEAN_CLASS_ID,
              "enocean_rps",
              DsGroup::YellowLight,
            );
            let mut down = ButtonBehaviour::new(0, "Down key", DsGroup::YellowLight);
            down.set_hardware_config(DsButtonType::TwoWay, DsButtonElement::Down, false);
            device.add_button(down);
            let mut up = ButtonBehaviour::new(1, "Up key", DsGroup::YellowLight);
            up.set_hardware_config(DsButtonType::TwoWay, DsButtonElement::Up, false);
            device.add_button(up);
            entries.push(EnoceanDeviceEntry {
              device,
              handlers: vec![ChannelHandler::Rps {
                switch_index: subdevice,
                pressed: [false; 2],
              }],
              known: KnownDeviceRow {
                address,
                subdevice,
                profile,
                manufacturer,
                ..Default::default()
              },
            });
          }
        }
        0x10 => {
          // window handle
          let mut device = Device::new(
            enocean_dsuid(address, 0),
            ENOCEAN_CLASS_ID,
            "enocean_winhandle",
            DsGroup::RedSecurity,
          );
          let mut input = BinaryInputBehaviour::new(
            0,
            "Window handle",
            DsGroup::RedSecurity,
            DsBinaryInputType::None,
          );
          input.reports_changes = true;
          device.add_binary_input(input);
          entries.push(EnoceanDeviceEntry {
            device,
            handlers: vec![ChannelHandler::WindowHandle { input_index: 0 }],
            known: KnownDeviceRow {
              address,
              subdevice: 0,
              profile,
              manufacturer,
              ..Default::default()
            },
          });
        }
        _ => {}
      },
      rorg::ONE_BS => {
        let mut device = Device::new(
          enocean_dsuid(address, 0),
          ENOCEAN_CLASS_ID,
          "enocean_1bs",
          DsGroup::RedSecurity,
        );
        device.add_binary_input(BinaryInputBehaviour::new(
          0,
          "Contact",
          DsGroup::RedSecurity,
          DsBinaryInputType::None,
        ));
        entries.push(EnoceanDeviceEntry {
          device,
          handlers: vec![ChannelHandler::OneBs { input_index: 0 }],
          known: KnownDeviceRow {
            address,
            subdevice: 0,
            profile,
            manufacturer,
            ..Default::default()
          },
        });
      }
      rorg::FOUR_BS => {
        let rows = descriptors_for(func, eep_type);
        if rows.is_empty() {
          info!("no 4BS descriptors for profile {profile:06X}, module not usable");
          return entries;
        }
        // group rows by subdevice, one logical device each
        let mut subdevices: Vec<EnoceanSubDevice> = rows.iter().map(|r| r.subdevice).collect();
        subdevices.sort_unstable();
        subdevices.dedup();
        for subdevice in subdevices {
          let mut device = Device::new(
            enocean_dsuid(address, subdevice),
            ENOCEAN_CLASS_ID,
            "enocean_4bs",
            DsGroup::BlueClimate,
          );
          let mut device_handlers = Vec::new();
          for descriptor in rows.iter().filter(|r| r.subdevice == subdevice) {
            match descriptor.target {
              FourBsTarget::Sensor(sensor_type) => {
                let index = device.sensors.len();
                let resolution =
                  (descriptor.max - descriptor.min) / descriptor.raw_span() as f64;
                let mut sensor = SensorBehaviour::new(
                  index,
                  descriptor.type_text,
                  descriptor.group,
                  sensor_type,
                  descriptor.min,
                  descriptor.max,
                  resolution,
                );
                sensor.set_update_interval(descriptor.update_interval);
                device.add_sensor(sensor);
                device_handlers.push(ChannelHandler::FourBs {
                  descriptor,
                  behaviour_index: index,
                });
              }
              FourBsTarget::BinaryInput(input_type) => {
                let index = device.binary_inputs.len();
                let mut input = BinaryInputBehaviour::new(
                  index,
                  descriptor.type_text,
                  descriptor.group,
                  input_type,
                );
                input.set_update_interval(descriptor.update_interval);
                device.add_binary_input(input);
                device_handlers.push(ChannelHandler::FourBs {
                  descriptor,
                  behaviour_index: index,
                });
              }
            }
          }
          entries.push(EnoceanDeviceEntry {
            device,
            handlers: device_handlers,
            known: KnownDeviceRow {
              address,
              subdevice,
              profile,
              manufacturer,
              ..Default::default()
            },
          });
        }
      }
      _ => {
        debug!("unsupported RORG {rorg_byte:02X}, no devices created");
      }
    }
    entries
  }

  fn insert_entry(&mut self, entry: EnoceanDeviceEntry) -> DsUid {
    let dsuid = *entry.device.dsuid();
    self
      .by_address
      .entry(entry.known.address)
      .or_default()
      .push(dsuid);
    self.devices.insert(dsuid, entry);
    dsuid
  }

  /// Pair a new module: create the logical devices, load their settings
  /// and persist the pairing.
  fn learn_in(
    &mut self,
    services: &VdcServices,
    address: EnoceanAddress,
    profile: EnoceanProfile,
    manufacturer: EnoceanManufacturer,
  ) -> VdcResult<Vec<DeviceNotification>> {
    self.ensure_tech_store(services)?;
    let entries = Self::entries_for_profile(address, profile, manufacturer);
    if entries.is_empty() {
      return Err(
        VdcDeviceError::MissingData(format!("unsupported EEP profile {profile:06X}")).into(),
      );
    }
    let mut notes = Vec::new();
    for mut entry in entries {
      entry.device.load_settings(services.store(), services.data_dir())?;
      entry.known.mark_dirty();
      if let Some(store) = self.tech_store.as_ref() {
        entry.known.save_to_store(store, KNOWN_DEVICES_PARENT)?;
      }
      info!(
        "learned in EnOcean device {:08X}/{} as {}",
        address,
        entry.known.subdevice,
        entry.device.dsuid()
      );
      let dsuid = self.insert_entry(entry);
      notes.push(DeviceNotification::Appeared { dsuid });
    }
    Ok(notes)
  }

  /// Unpair all logical devices of a module. dS level settings are kept
  /// unless `forget` is set, so a re-paired module finds them again.
  fn unpair(
    &mut self,
    services: &VdcServices,
    address: EnoceanAddress,
    forget: bool,
  ) -> Vec<DeviceNotification> {
    let mut notes = Vec::new();
    let Some(dsuids) = self.by_address.remove(&address) else {
      return notes;
    };
    for dsuid in dsuids {
      if let Some(mut entry) = self.devices.remove(&dsuid) {
        if let Some(store) = self.tech_store.as_ref() {
          if let Err(e) = entry.known.delete_from_store(store) {
            error!("deleting pairing for {} failed: {}", dsuid, e);
          }
        }
        if forget {
          if let Err(e) = entry.device.forget_settings(services.store()) {
            error!("forgetting settings for {} failed: {}", dsuid, e);
          }
        }
        info!("unpaired EnOcean device {}", dsuid);
        notes.push(DeviceNotification::Vanished { dsuid });
      }
    }
    notes
  }

  async fn process_packet(
    &mut self,
    services: &VdcServices,
    packet: Esp3Packet,
  ) -> Vec<DeviceNotification> {
    if packet.packet_type() != PacketType::Radio {
      trace!("ignoring non-radio ESP3 packet");
      return Vec::new();
    }
    let sender = packet.radio_sender();
    if self.common.learning() {
      // learning mode: a valid teach-in either pairs a new module or, if
      // the module is already known, unpairs it again (teach toggle)
      if eep::has_teach_info(&packet, eep::MIN_LEARN_DBM) {
        if self.by_address.contains_key(&sender) {
          return self.unpair(services, sender, false);
        }
        let profile = eep::eep_profile(&packet);
        let manufacturer = eep::eep_manufacturer(&packet);
        match self.learn_in(services, sender, profile, manufacturer) {
          Ok(notes) => return notes,
          Err(e) => {
            warn!("learn-in of {:08X} failed: {}", sender, e);
            return Vec::new();
          }
        }
      }
      Vec::new()
    } else {
      // regular operation: hand the packet to every handler of every
      // logical device paired for the sender
      let now_ms = services.now_ms();
      let mut notes = Vec::new();
      let Some(dsuids) = self.by_address.get(&sender).cloned() else {
        return notes;
      };
      for dsuid in dsuids {
        if let Some(entry) = self.devices.get_mut(&dsuid) {
          let EnoceanDeviceEntry { device, handlers, .. } = entry;
          for handler in handlers.iter_mut() {
            for push in handler.handle_packet(device, &packet, now_ms).await {
              notes.push(DeviceNotification::Push { dsuid, push });
            }
          }
        }
      }
      notes
    }
  }
}

#[async_trait(?Send)]
impl Vdc for EnoceanVdc {
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
    self.devices.get(dsuid).map(|e| &e.device)
  }

  fn device_mut(&mut self, dsuid: &DsUid) -> Option<&mut Device> {
    self.devices.get_mut(dsuid).map(|e| &mut e.device)
  }

  /// Radio devices cannot be scanned actively; collection reconstructs
  /// the previously learned-in modules from the pairing table.
  async fn collect_devices(
    &mut self,
    services: &VdcServices,
    incremental: bool,
    _exhaustive: bool,
    clear_settings: bool,
  ) -> VdcResult<()> {
    if !incremental {
      self.devices.clear();
      self.by_address.clear();
    }
    self.ensure_tech_store(services)?;
    let store = self.tech_store.as_ref().expect("opened above");
    let template = KnownDeviceRow::default();
    store.ensure_table(template.table_name(), template.key_defs(), template.field_defs())?;
    let sql = template.select_sql();
    let mut rows_data = Vec::new();
    {
      let mut stmt = store.connection().prepare(&sql).map_err(db_err)?;
      let mut rows = stmt.query([KNOWN_DEVICES_PARENT]).map_err(db_err)?;
      while let Some(row) = rows.next().map_err(db_err)? {
        let mut known = KnownDeviceRow::default();
        let row_id: i64 = row.get(0).map_err(db_err)?;
        known.set_row_id(row_id);
        let mut index = 1;
        known.load_from_row(row, &mut index)?;
        rows_data.push(known);
      }
    }
    for known in rows_data {
      let entries = Self::entries_for_profile(known.address, known.profile, known.manufacturer);
      for mut entry in entries {
        if entry.known.subdevice != known.subdevice {
          continue;
        }
        entry.known.set_row_id(known.row_id());
        if clear_settings {
          entry.device.forget_settings(services.store())?;
        }
        entry.device.load_settings(services.store(), services.data_dir())?;
        debug!("reconstructed EnOcean device {}", entry.device.dsuid());
        self.insert_entry(entry);
      }
    }
    info!(
      "EnOcean collection done, {} logical devices from pairing table",
      self.devices.len()
    );
    Ok(())
  }

  async fn remove_device(
    &mut self,
    services: &VdcServices,
    dsuid: &DsUid,
    forget: bool,
  ) -> VdcResult<()> {
    let Some(entry) = self.devices.get(dsuid) else {
      return Ok(());
    };
    let address = entry.known.address;
    // removing one logical device unpairs the whole module; rockers and
    // their sibling sub-devices cannot exist half-paired
    self.unpair(services, address, forget);
    Ok(())
  }

  async fn service(&mut self, services: &VdcServices) -> Vec<DeviceNotification> {
    let mut notes = Vec::new();
    while let Ok(packet) = self.packet_rx.try_recv() {
      notes.extend(self.process_packet(services, packet).await);
    }
    notes
  }
}

#[cfg(test)]
mod test {
  use super::*;

  fn services(dir: &std::path::Path) -> VdcServices {
    let store = ParamStore::open(dir.join("DsParams.sqlite3")).expect("store opens");
    VdcServices::new(store, dir.to_path_buf())
  }

  fn teach_4bs_a5_02_01(sender: EnoceanAddress) -> Esp3Packet {
    Esp3Packet::new_radio(rorg::FOUR_BS, &[0x08, 0x08, 0x0B, 0x80], sender, 0)
  }

  #[tokio::test]
  async fn test_learn_in_and_reload() {
    let dir = tempfile::tempdir().expect("tempdir");
    let services = services(dir.path());
    let (mut vdc, _tx) = EnoceanVdc::new(1);
    vdc.set_learn_mode(true);
    let notes = vdc.process_packet(&services, teach_4bs_a5_02_01(0x0099_1122)).await;
    assert_eq!(notes.len(), 1);
    assert!(matches!(notes[0], DeviceNotification::Appeared { .. }));
    assert_eq!(vdc.device_dsuids().len(), 1);

    // a fresh container instance reconstructs the device from the
    // pairing table without any teach-in
    drop(vdc);
    let (mut reloaded, _tx) = EnoceanVdc::new(1);
    reloaded
      .collect_devices(&services, false, false, false)
      .await
      .expect("collect");
    assert_eq!(reloaded.device_dsuids().len(), 1);
    let dsuid = reloaded.device_dsuids()[0];
    assert_eq!(reloaded.device(&dsuid).expect("device").device_type_id(), "enocean_4bs");
  }

  #[tokio::test]
  async fn test_teach_toggle_unpairs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let services = services(dir.path());
    let (mut vdc, _tx) = EnoceanVdc::new(1);
    vdc.set_learn_mode(true);
    vdc.process_packet(&services, teach_4bs_a5_02_01(0x0099_1122)).await;
    assert_eq!(vdc.device_dsuids().len(), 1);
    // the same module teaching in again is a learn-out
    let notes = vdc.process_packet(&services, teach_4bs_a5_02_01(0x0099_1122)).await;
    assert!(matches!(notes[0], DeviceNotification::Vanished { .. }));
    assert!(vdc.device_dsuids().is_empty());
    // and the pairing table is empty again
    drop(vdc);
    let (mut reloaded, _tx) = EnoceanVdc::new(1);
    reloaded
      .collect_devices(&services, false, false, false)
      .await
      .expect("collect");
    assert!(reloaded.device_dsuids().is_empty());
  }

  #[tokio::test]
  async fn test_data_packet_updates_sensor_and_pushes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let services = services(dir.path());
    let (mut vdc, _tx) = EnoceanVdc::new(1);
    vdc.set_learn_mode(true);
    vdc.process_packet(&services, teach_4bs_a5_02_01(0x0099_1122)).await;
    vdc.set_learn_mode(false);
    // -20.08 degC reading
    let data = Esp3Packet::new_radio(rorg::FOUR_BS, &[0x00, 0x00, 0x80, 0x08], 0x0099_1122, 0);
    let notes = vdc.process_packet(&services, data).await;
    assert_eq!(notes.len(), 1);
    let DeviceNotification::Push { dsuid, push } = &notes[0] else {
      panic!("expected push");
    };
    let vdc_server::device::DevicePush::SensorValue { value, .. } = push else {
      panic!("expected sensor value");
    };
    assert!((*value + 20.08).abs() < 0.01);
    let device = vdc.device(dsuid).expect("device");
    assert!(device.sensors[0].value().is_some());
  }

  #[tokio::test]
  async fn test_rps_learn_creates_two_rockers() {
    let dir = tempfile::tempdir().expect("tempdir");
    let services = services(dir.path());
    let (mut vdc, _tx) = EnoceanVdc::new(1);
    vdc.set_learn_mode(true);
    // strong RPS press (-30 dBm) is an implicit teach-in
    let press = Esp3Packet::new_radio(
      rorg::RPS,
      &[0x30],
      0x0086_B81A,
      crate::esp3::STATUS_T21 | crate::esp3::STATUS_NU,
    )
    .with_dbm(30);
    let notes = vdc.process_packet(&services, press).await;
    assert_eq!(notes.len(), 2); // one logical device per rocker
    assert_eq!(vdc.device_dsuids().len(), 2);
    for dsuid in vdc.device_dsuids() {
      assert_eq!(vdc.device(&dsuid).expect("device").buttons.len(), 2);
    }
  }
}
