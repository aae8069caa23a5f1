// vdcd-rs Source Code File - Virtual Device Controller for digitalSTROM.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Per-profile channel handlers: the glue between decoded radio
//! telegrams and the behaviours of the logical device.
//!
//! Every behaviour of an EnOcean device has one handler; the container
//! delivers every non-teach-in packet from the matching sender address
//! to all handlers of all devices for that address.

use vdc_core::dsdefs::{DsBinaryInputType, DsGroup, DsSensorType};
use vdc_server::device::{Device, DevicePush};

use crate::esp3::{rorg, Esp3Packet, STATUS_NU, STATUS_T21};
use crate::eep;

/// Bit position within the 32 bit 4BS word (bit 31 = DB_3.7, bit 0 = DB_0.0).
const fn db(byte: u8, bit: u8) -> u8 {
  byte * 8 + bit
}

/// How a 4BS bit field is turned into a behaviour update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitFieldHandler {
  /// Extract the field and deliver as raw sensor value.
  Std,
  /// Extract from the bit-inverted data word (sensors that count down).
  Inv,
  /// Single bit delivered to a binary input.
  StdInput,
}

/// Which behaviour kind a 4BS field feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FourBsTarget {
  Sensor(DsSensorType),
  BinaryInput(DsBinaryInputType),
}

/// One row of the 4BS decoding table: a (FUNC, TYPE) profile field and
/// its mapping onto a dS behaviour.
#[derive(Debug, Clone, Copy)]
pub struct FourBsDescriptor {
  pub func: u8,
  pub eep_type: u8,
  pub subdevice: u8,
  pub group: DsGroup,
  pub target: FourBsTarget,
  pub min: f64,
  pub max: f64,
  pub ms_bit: u8,
  pub ls_bit: u8,
  /// Average update interval in seconds.
  pub update_interval: f64,
  pub handler: BitFieldHandler,
  pub type_text: &'static str,
  pub unit_text: &'static str,
}

const fn temp_sensor(
  eep_type: u8,
  min: f64,
  max: f64,
  ms_bit: u8,
  ls_bit: u8,
) -> FourBsDescriptor {
  FourBsDescriptor {
    func: 0x02,
    eep_type,
    subdevice: 0,
    group: DsGroup::BlueClimate,
    target: FourBsTarget::Sensor(DsSensorType::Temperature),
    min,
    max,
    ms_bit,
    ls_bit,
    update_interval: 100.0,
    handler: BitFieldHandler::Inv,
    type_text: "Temperature",
    unit_text: "°C",
  }
}

/// The 4BS profile table. FUNC 0x02 is the A5-02 temperature sensor
/// family; A5-04-01 adds humidity, A5-10-06 is a room operating panel.
#[rustfmt::skip]
pub static FOUR_BS_DESCRIPTORS: [FourBsDescriptor; 29] = [
  // A5-02: temperature sensors, 40 degree ranges
  temp_sensor(0x01, -40.0,   0.0, db(1, 7), db(1, 0)),
  temp_sensor(0x02, -30.0,  10.0, db(1, 7), db(1, 0)),
  temp_sensor(0x03, -20.0,  20.0, db(1, 7), db(1, 0)),
  temp_sensor(0x04, -10.0,  30.0, db(1, 7), db(1, 0)),
  temp_sensor(0x05,   0.0,  40.0, db(1, 7), db(1, 0)),
  temp_sensor(0x06,  10.0,  50.0, db(1, 7), db(1, 0)),
  temp_sensor(0x07,  20.0,  60.0, db(1, 7), db(1, 0)),
  temp_sensor(0x08,  30.0,  70.0, db(1, 7), db(1, 0)),
  temp_sensor(0x09,  40.0,  80.0, db(1, 7), db(1, 0)),
  temp_sensor(0x0A,  50.0,  90.0, db(1, 7), db(1, 0)),
  temp_sensor(0x0B,  60.0, 100.0, db(1, 7), db(1, 0)),
  // - 80 degree ranges
  temp_sensor(0x10, -60.0,  20.0, db(1, 7), db(1, 0)),
  temp_sensor(0x11, -50.0,  30.0, db(1, 7), db(1, 0)),
  temp_sensor(0x12, -40.0,  40.0, db(1, 7), db(1, 0)),
  temp_sensor(0x13, -30.0,  50.0, db(1, 7), db(1, 0)),
  temp_sensor(0x14, -20.0,  60.0, db(1, 7), db(1, 0)),
  temp_sensor(0x15, -10.0,  70.0, db(1, 7), db(1, 0)),
  temp_sensor(0x16,   0.0,  80.0, db(1, 7), db(1, 0)),
  temp_sensor(0x17,  10.0,  90.0, db(1, 7), db(1, 0)),
  temp_sensor(0x18,  20.0, 100.0, db(1, 7), db(1, 0)),
  temp_sensor(0x19,  30.0, 110.0, db(1, 7), db(1, 0)),
  temp_sensor(0x1A,  40.0, 120.0, db(1, 7), db(1, 0)),
  temp_sensor(0x1B,  50.0, 130.0, db(1, 7), db(1, 0)),
  // - 10 bit variants
  temp_sensor(0x20, -10.0, 42.2, db(2, 1), db(1, 0)),
  temp_sensor(0x30, -40.0, 62.3, db(2, 1), db(1, 0)),
  // A5-04-01: temperature and humidity
  FourBsDescriptor {
    func: 0x04, eep_type: 0x01, subdevice: 0, group: DsGroup::BlueClimate,
    target: FourBsTarget::Sensor(DsSensorType::Temperature),
    min: 0.0, max: 40.0, ms_bit: db(1, 7), ls_bit: db(1, 0),
    update_interval: 100.0, handler: BitFieldHandler::Std,
    type_text: "Temperature", unit_text: "°C",
  },
  FourBsDescriptor {
    func: 0x04, eep_type: 0x01, subdevice: 0, group: DsGroup::BlueClimate,
    target: FourBsTarget::Sensor(DsSensorType::Humidity),
    min: 0.0, max: 100.0, ms_bit: db(2, 7), ls_bit: db(2, 0),
    update_interval: 100.0, handler: BitFieldHandler::Std,
    type_text: "Humidity", unit_text: "%",
  },
  // A5-10-06: room operating panel (temperature, set point, day/night)
  FourBsDescriptor {
    func: 0x10, eep_type: 0x06, subdevice: 0, group: DsGroup::BlueClimate,
    target: FourBsTarget::Sensor(DsSensorType::Temperature),
    min: 0.0, max: 40.0, ms_bit: db(1, 7), ls_bit: db(1, 0),
    update_interval: 100.0, handler: BitFieldHandler::Inv,
    type_text: "Temperature", unit_text: "°C",
  },
  FourBsDescriptor {
    func: 0x10, eep_type: 0x06, subdevice: 0, group: DsGroup::BlueClimate,
    target: FourBsTarget::Sensor(DsSensorType::SetPoint),
    min: 0.0, max: 1.0, ms_bit: db(2, 7), ls_bit: db(2, 0),
    update_interval: 100.0, handler: BitFieldHandler::Std,
    type_text: "Set Point", unit_text: "1",
  },
];

/// All table rows for a (FUNC, TYPE) pair.
pub fn descriptors_for(func: u8, eep_type: u8) -> Vec<&'static FourBsDescriptor> {
  FOUR_BS_DESCRIPTORS
    .iter()
    .filter(|d| d.func == func && d.eep_type == eep_type)
    .collect()
}

impl FourBsDescriptor {
  /// Number of raw steps of the bit field, for deriving the sensor
  /// resolution.
  pub fn raw_span(&self) -> u32 {
    let bits = self.ms_bit - self.ls_bit + 1;
    (1u32 << bits) - 1
  }

  fn extract(&self, data: u32) -> u32 {
    let bits = self.ms_bit - self.ls_bit + 1;
    let mask = if bits >= 32 { u32::MAX } else { (1u32 << bits) - 1 };
    (data >> self.ls_bit) & mask
  }
}

/// One channel handler attached to a behaviour of an EnOcean device.
#[derive(Debug, Clone)]
pub enum ChannelHandler {
  /// Rocker switch half-pair; decodes N/U messages for one sub-device.
  Rps {
    switch_index: u8,
    /// Per-half pressed state, to suppress duplicate edges.
    pressed: [bool; 2],
  },
  /// Single contact input.
  OneBs { input_index: usize },
  /// Window handle position (F6-10-00), reported as open/closed input.
  WindowHandle { input_index: usize },
  /// 4BS bit field feeding a sensor or binary input.
  FourBs {
    descriptor: &'static FourBsDescriptor,
    behaviour_index: usize,
  },
}

impl ChannelHandler {
  /// Deliver a non-teach-in radio packet to this handler's behaviour.
  /// Button edges run through the device's button machine, so handling
  /// is async (local output actions may apply channels).
  pub async fn handle_packet(
    &mut self,
    device: &mut Device,
    packet: &Esp3Packet,
    now_ms: u64,
  ) -> Vec<DevicePush> {
    match self {
      ChannelHandler::Rps { switch_index, pressed } => {
        if packet.eep_rorg() != Some(rorg::RPS) || packet.radio_user_data().is_empty() {
          return Vec::new();
        }
        Self::handle_rps(device, packet, *switch_index, pressed, now_ms).await
      }
      ChannelHandler::OneBs { input_index } => {
        if packet.eep_rorg() != Some(rorg::ONE_BS)
          || eep::has_teach_info(packet, eep::MIN_LEARN_DBM)
          || packet.radio_user_data().is_empty()
        {
          return Vec::new();
        }
        let closed = packet.radio_user_data()[0] & 0x01 != 0;
        let index = *input_index;
        match device.binary_inputs.get_mut(index) {
          Some(input) => {
            if input.update_input_state(closed) {
              vec![DevicePush::InputState { index, value: closed }]
            } else {
              Vec::new()
            }
          }
          None => Vec::new(),
        }
      }
      ChannelHandler::WindowHandle { input_index } => {
        if packet.eep_rorg() != Some(rorg::RPS) || packet.radio_user_data().is_empty() {
          return Vec::new();
        }
        // handle fully turned down (0xFx in the high nibble) means closed
        let open = packet.radio_user_data()[0] >> 4 != 0x0F;
        let index = *input_index;
        match device.binary_inputs.get_mut(index) {
          Some(input) => {
            if input.update_input_state(open) {
              vec![DevicePush::InputState { index, value: open }]
            } else {
              Vec::new()
            }
          }
          None => Vec::new(),
        }
      }
      ChannelHandler::FourBs { descriptor, behaviour_index } => {
        if packet.eep_rorg() != Some(rorg::FOUR_BS)
          || eep::has_teach_info(packet, eep::MIN_LEARN_DBM)
          || packet.radio_user_data().len() != 4
        {
          return Vec::new();
        }
        let d = packet.radio_user_data();
        let data = u32::from_be_bytes([d[0], d[1], d[2], d[3]]);
        Self::handle_four_bs(device, descriptor, *behaviour_index, data)
      }
    }
  }

  fn handle_four_bs(
    device: &mut Device,
    descriptor: &'static FourBsDescriptor,
    behaviour_index: usize,
    data: u32,
  ) -> Vec<DevicePush> {
    match (descriptor.handler, descriptor.target) {
      (BitFieldHandler::StdInput, FourBsTarget::BinaryInput(_)) => {
        let raw = descriptor.extract(data) & 0x01;
        let state = if raw != 0 {
          descriptor.max != 0.0
        } else {
          descriptor.min != 0.0
        };
        match device.binary_inputs.get_mut(behaviour_index) {
          Some(input) => {
            if input.update_input_state(state) {
              vec![DevicePush::InputState { index: behaviour_index, value: state }]
            } else {
              Vec::new()
            }
          }
          None => Vec::new(),
        }
      }
      (handler, FourBsTarget::Sensor(_)) => {
        let effective = if handler == BitFieldHandler::Inv { !data } else { data };
        let raw = descriptor.extract(effective);
        match device.sensors.get_mut(behaviour_index) {
          Some(sensor) => {
            if sensor.update_engineering_value(raw) {
              let value = sensor.value().unwrap_or_default();
              vec![DevicePush::SensorValue { index: behaviour_index, value }]
            } else {
              Vec::new()
            }
          }
          None => Vec::new(),
        }
      }
      _ => Vec::new(),
    }
  }

  async fn handle_rps(
    device: &mut Device,
    packet: &Esp3Packet,
    switch_index: u8,
    pressed: &mut [bool; 2],
    now_ms: u64,
  ) -> Vec<DevicePush> {
    let data = packet.radio_user_data()[0];
    let status = packet.radio_status();
    let mut pushes = Vec::new();
    if status & STATUS_NU != 0 {
      // N-message: up to two explicit actions of 3 bits each
      for action_index in (0..=1).rev() {
        if action_index == 0 && (data & 0x01) == 0 {
          break; // no second action
        }
        let action = (data >> (4 * action_index + 1)) & 0x07;
        if (action >> 1) & 0x03 == switch_index {
          let is_down = action & 0x01 != 0;
          let is_pressed = (data & 0x10) != 0;
          pushes.extend(
            Self::set_button_state(device, pressed, is_down as usize, is_pressed, now_ms).await,
          );
        }
      }
    } else {
      // U-message: mass press/release without rocker identification
      let affected = (data >> 5) & 0x07;
      let affects_me = if status & STATUS_T21 != 0 {
        // 2-rocker: 0 = all buttons, 3 = 3 or 4 buttons affected
        affected == 0 || affected == 3
      } else {
        // 4-rocker: 0 = all, anything above = some switches affected
        affected == 0 || (affected + 1) >> 1 > 0
      };
      if affects_me {
        if (data & 0x10) != 0 {
          // ambiguous press of several buttons: ignored, individual
          // actions come as N-messages
        } else {
          // release: report both halves of the rocker released
          pushes.extend(Self::set_button_state(device, pressed, 0, false, now_ms).await);
          pushes.extend(Self::set_button_state(device, pressed, 1, false, now_ms).await);
        }
      }
    }
    pushes
  }

  /// Only propagate real edges; radio repeats the same state.
  async fn set_button_state(
    device: &mut Device,
    pressed: &mut [bool; 2],
    half: usize,
    is_pressed: bool,
    now_ms: u64,
  ) -> Vec<DevicePush> {
    if pressed[half] == is_pressed {
      return Vec::new();
    }
    pressed[half] = is_pressed;
    // half 0 = down key (button index 0), half 1 = up key (button index 1)
    device.process_button_edge(half, is_pressed, half == 1, now_ms).await
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use vdc_core::dsdefs::DsGroup;
  use vdc_core::ident::DsUid;
  use vdc_server::behaviour::SensorBehaviour;

  fn sensor_device(descriptor: &'static FourBsDescriptor) -> Device {
    let mut device = Device::new(
      DsUid::classic(1, 1),
      "enocean",
      "enocean_4bs",
      DsGroup::BlueClimate,
    );
    let resolution = (descriptor.max - descriptor.min) / descriptor.raw_span() as f64;
    device.add_sensor(SensorBehaviour::new(
      0,
      descriptor.type_text,
      descriptor.group,
      DsSensorType::Temperature,
      descriptor.min,
      descriptor.max,
      resolution,
    ));
    device
  }

  #[tokio::test]
  async fn test_a5_02_01_temperature_decoding() {
    // A5-02-01: -40..0 degC in DB_1, inverted
    let descriptor = descriptors_for(0x02, 0x01)[0];
    let mut device = sensor_device(descriptor);
    let mut handler = ChannelHandler::FourBs { descriptor, behaviour_index: 0 };
    // teach-in telegram (LRN bit clear): no value delivered
    let teach = Esp3Packet::new_radio(rorg::FOUR_BS, &[0x08, 0x08, 0x0B, 0x80], 0x0102_0304, 0);
    assert!(handler.handle_packet(&mut device, &teach, 0).await.is_empty());
    assert!(device.sensors[0].value().is_none());
    // data telegram DB_1=0x80 -> inverted 0x7F = 127 -> -20.08 degC
    let data = Esp3Packet::new_radio(rorg::FOUR_BS, &[0x00, 0x00, 0x80, 0x08], 0x0102_0304, 0);
    let pushes = handler.handle_packet(&mut device, &data, 0).await;
    assert_eq!(pushes.len(), 1);
    let value = device.sensors[0].value().expect("sensor updated");
    assert!((value - (127.0 / 255.0 * 40.0 - 40.0)).abs() < 0.01, "got {value}");
    // same telegram again: no change, no push
    assert!(handler.handle_packet(&mut device, &data, 0).await.is_empty());
  }

  fn rocker_device() -> Device {
    use vdc_core::dsdefs::{DsButtonElement, DsButtonType};
    use vdc_server::behaviour::ButtonBehaviour;
    let mut device = Device::new(DsUid::classic(1, 2), "enocean", "enocean_rps", DsGroup::YellowLight);
    let mut down = ButtonBehaviour::new(0, "Down key", DsGroup::YellowLight);
    down.set_hardware_config(DsButtonType::TwoWay, DsButtonElement::Down, false);
    device.add_button(down);
    let mut up = ButtonBehaviour::new(1, "Up key", DsGroup::YellowLight);
    up.set_hardware_config(DsButtonType::TwoWay, DsButtonElement::Up, false);
    device.add_button(up);
    device
  }

  fn rps_n_message(action: u8, pressed: bool) -> Esp3Packet {
    let data = (action << 5) | if pressed { 0x10 } else { 0x00 };
    Esp3Packet::new_radio(rorg::RPS, &[data], 0x0086_B81A, STATUS_T21 | STATUS_NU)
  }

  #[tokio::test]
  async fn test_rps_n_message_press_release() {
    let mut device = rocker_device();
    let mut handler = ChannelHandler::Rps { switch_index: 0, pressed: [false; 2] };
    // press rocker 0, down half (action 0b000)
    let press = rps_n_message(0x00, true);
    handler.handle_packet(&mut device, &press, 1000).await;
    assert!(device.buttons[0].machine.is_pressed());
    assert!(!device.buttons[1].machine.is_pressed());
    // duplicate press suppressed (no new edge into the machine)
    handler.handle_packet(&mut device, &press, 1010).await;
    // release
    let release = rps_n_message(0x00, false);
    handler.handle_packet(&mut device, &release, 1100).await;
    assert!(!device.buttons[0].machine.is_pressed());
    // up half addresses button 1
    let press_up = rps_n_message(0x01, true);
    handler.handle_packet(&mut device, &press_up, 2500).await;
    assert!(device.buttons[1].machine.is_pressed());
  }

  #[tokio::test]
  async fn test_rps_other_rocker_ignored() {
    let mut device = rocker_device();
    // handler for sub-device 1, but the action addresses rocker 0
    let mut handler = ChannelHandler::Rps { switch_index: 1, pressed: [false; 2] };
    let press = rps_n_message(0x00, true);
    handler.handle_packet(&mut device, &press, 1000).await;
    assert!(!device.buttons[0].machine.is_pressed());
    assert!(!device.buttons[1].machine.is_pressed());
  }

  #[tokio::test]
  async fn test_rps_u_message_mass_release() {
    let mut device = rocker_device();
    let mut handler = ChannelHandler::Rps { switch_index: 0, pressed: [false; 2] };
    handler.handle_packet(&mut device, &rps_n_message(0x00, true), 1000).await;
    assert!(device.buttons[0].machine.is_pressed());
    // U-message release (NU clear, pressed bit clear, all buttons)
    let release = Esp3Packet::new_radio(rorg::RPS, &[0x00], 0x0086_B81A, STATUS_T21);
    handler.handle_packet(&mut device, &release, 1200).await;
    assert!(!device.buttons[0].machine.is_pressed());
    // U-message press is ambiguous and ignored
    let press = Esp3Packet::new_radio(rorg::RPS, &[0x10], 0x0086_B81A, STATUS_T21);
    handler.handle_packet(&mut device, &press, 1300).await;
    assert!(!device.buttons[0].machine.is_pressed());
  }
}
