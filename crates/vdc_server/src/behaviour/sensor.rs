// vdcd-rs Source Code File - Virtual Device Controller for digitalSTROM.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Sensor behaviour: a continuous measurement (temperature, humidity,
//! illumination ...) delivered into the dS system as engineering values.

use std::time::Instant;

use serde_json::Value;

use vdc_core::dsdefs::{DsGroup, DsSensorType};
use vdc_core::VdcResult;

use super::{BehaviourBase, BehaviourKind};
use crate::property::{
  PropertyContainer,
  PropertyDescriptor,
  PropertyType,
  DESCRIPTION_KEY_OFFSET,
  STATE_KEY_OFFSET,
};

/// Sensor behaviour. Raw hardware values are converted to engineering
/// units through `min + raw * resolution`, where the resolution is
/// derived from the hardware's bit width at creation time.
#[derive(Debug, Clone)]
pub struct SensorBehaviour {
  pub base: BehaviourBase,
  pub sensor_type: DsSensorType,
  pub min: f64,
  pub max: f64,
  /// Engineering value per raw LSB.
  pub resolution: f64,
  /// Average update interval in seconds.
  pub update_interval: f64,
  value: Option<f64>,
  last_update: Option<Instant>,
}

impl SensorBehaviour {
  pub fn new(
    index: usize,
    hardware_name: &str,
    group: DsGroup,
    sensor_type: DsSensorType,
    min: f64,
    max: f64,
    resolution: f64,
  ) -> Self {
    Self {
      base: BehaviourBase::new(index, hardware_name, group),
      sensor_type,
      min,
      max,
      resolution,
      update_interval: 0.0,
      value: None,
      last_update: None,
    }
  }

  pub fn set_update_interval(&mut self, seconds: f64) {
    self.update_interval = seconds;
  }

  /// Feed a raw hardware value; converts to the engineering value.
  /// Returns true when the value changed by at least one resolution step.
  pub fn update_engineering_value(&mut self, raw: u32) -> bool {
    let engineering = self.min + raw as f64 * self.resolution;
    self.update_value(engineering)
  }

  /// Feed an already-converted value.
  pub fn update_value(&mut self, value: f64) -> bool {
    let changed = match self.value {
      None => true,
      Some(old) => (old - value).abs() >= self.resolution,
    };
    if changed {
      self.value = Some(value);
      debug!(
        "sensor '{}' now {:.2} (type {:?})",
        self.base.hardware_name, value, self.sensor_type
      );
    }
    self.last_update = Some(Instant::now());
    changed
  }

  pub fn value(&self) -> Option<f64> {
    self.value
  }

  pub fn last_update(&self) -> Option<Instant> {
    self.last_update
  }
}

const SENSOR_PROPS: [PropertyDescriptor; 7] = [
  PropertyDescriptor::field("name", PropertyType::String_, DESCRIPTION_KEY_OFFSET),
  PropertyDescriptor::field("type", PropertyType::String_, DESCRIPTION_KEY_OFFSET + 1),
  PropertyDescriptor::field("sensorType", PropertyType::Int8, DESCRIPTION_KEY_OFFSET + 2),
  PropertyDescriptor::field("min", PropertyType::Double, DESCRIPTION_KEY_OFFSET + 3),
  PropertyDescriptor::field("max", PropertyType::Double, DESCRIPTION_KEY_OFFSET + 4),
  PropertyDescriptor::field("resolution", PropertyType::Double, DESCRIPTION_KEY_OFFSET + 5),
  PropertyDescriptor::field("value", PropertyType::Double, STATE_KEY_OFFSET),
];

impl PropertyContainer for SensorBehaviour {
  fn descriptors(&self) -> &'static [PropertyDescriptor] {
    &SENSOR_PROPS
  }

  fn read_field(&self, desc: &PropertyDescriptor, _index: usize) -> VdcResult<Value> {
    Ok(match desc.access_key {
      k if k == DESCRIPTION_KEY_OFFSET => Value::from(self.base.hardware_name.clone()),
      k if k == DESCRIPTION_KEY_OFFSET + 1 => Value::from(BehaviourKind::Sensor.type_name()),
      k if k == DESCRIPTION_KEY_OFFSET + 2 => Value::from(self.sensor_type as u8),
      k if k == DESCRIPTION_KEY_OFFSET + 3 => Value::from(self.min),
      k if k == DESCRIPTION_KEY_OFFSET + 4 => Value::from(self.max),
      k if k == DESCRIPTION_KEY_OFFSET + 5 => Value::from(self.resolution),
      _ => self.value.map(Value::from).unwrap_or(Value::Null),
    })
  }

}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn test_engineering_conversion() {
    // -40..0 degC over 8 bits, as the EnOcean A5-02-01 profile delivers
    let mut sensor = SensorBehaviour::new(
      0,
      "Temperature",
      DsGroup::BlueClimate,
      DsSensorType::Temperature,
      -40.0,
      0.0,
      40.0 / 255.0,
    );
    assert!(sensor.update_engineering_value(127));
    let v = sensor.value().expect("has value");
    assert!((v - (127.0 / 255.0 * 40.0 - 40.0)).abs() < 0.01);
    assert!((v + 20.08).abs() < 0.01);
  }

  #[test]
  fn test_sub_resolution_change_suppressed() {
    let mut sensor = SensorBehaviour::new(
      0,
      "Temperature",
      DsGroup::BlueClimate,
      DsSensorType::Temperature,
      0.0,
      40.0,
      40.0 / 255.0,
    );
    assert!(sensor.update_engineering_value(100));
    assert!(!sensor.update_engineering_value(100));
    assert!(sensor.update_engineering_value(101));
  }
}
