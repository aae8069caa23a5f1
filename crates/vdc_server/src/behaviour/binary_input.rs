// vdcd-rs Source Code File - Virtual Device Controller for digitalSTROM.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Binary input behaviour: a two-state hardware input (contact, motion
//! detector, smoke alarm) reported into the dS system.

use std::time::Instant;

use rusqlite::types::Value as SqlValue;
use rusqlite::Row;
use serde_json::Value;

use vdc_core::dsdefs::{DsBinaryInputType, DsGroup};
use vdc_core::VdcResult;

use super::{BehaviourBase, BehaviourKind};
use crate::persist::{db_err, FieldDef, FieldType, PersistedParams};
use crate::property::{
  PropertyContainer,
  PropertyDescriptor,
  PropertyType,
  DESCRIPTION_KEY_OFFSET,
  SETTINGS_KEY_OFFSET,
  STATE_KEY_OFFSET,
};

/// Persisted binary input settings.
#[derive(Debug, Clone)]
pub struct BinaryInputSettings {
  row_id: i64,
  dirty: bool,
  pub group: DsGroup,
  /// The dS system function this input reports as.
  pub input_function: DsBinaryInputType,
}

impl Default for BinaryInputSettings {
  fn default() -> Self {
    Self {
      row_id: 0,
      dirty: false,
      group: DsGroup::BlackJoker,
      input_function: DsBinaryInputType::None,
    }
  }
}

const INPUT_SETTINGS_FIELDS: [FieldDef; 2] = [
  FieldDef::new("inputGroup", FieldType::Integer),
  FieldDef::new("inputFunction", FieldType::Integer),
];

impl PersistedParams for BinaryInputSettings {
  fn table_name(&self) -> &'static str {
    "inputSettings"
  }

  fn field_defs(&self) -> &'static [FieldDef] {
    &INPUT_SETTINGS_FIELDS
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
    let group: i64 = row.get(*index).map_err(db_err)?;
    *index += 1;
    let function: i64 = row.get(*index).map_err(db_err)?;
    *index += 1;
    self.group = serde_json::from_value(Value::from(group)).unwrap_or(DsGroup::BlackJoker);
    self.input_function =
      serde_json::from_value(Value::from(function)).unwrap_or(DsBinaryInputType::None);
    Ok(())
  }

  fn field_values(&self) -> Vec<SqlValue> {
    vec![
      SqlValue::Integer(self.group as i64),
      SqlValue::Integer(self.input_function as i64),
    ]
  }
}

/// Binary input behaviour.
#[derive(Debug, Clone)]
pub struct BinaryInputBehaviour {
  pub base: BehaviourBase,
  pub settings: BinaryInputSettings,
  /// Hardware-defined input type.
  pub input_type: DsBinaryInputType,
  /// True when the hardware reports changes on its own (no polling).
  pub reports_changes: bool,
  /// Expected update interval in seconds (0 = event driven only).
  pub update_interval: f64,
  state: Option<bool>,
  last_update: Option<Instant>,
}

impl BinaryInputBehaviour {
  pub fn new(index: usize, hardware_name: &str, group: DsGroup, input_type: DsBinaryInputType) -> Self {
    Self {
      base: BehaviourBase::new(index, hardware_name, group),
      settings: BinaryInputSettings {
        group,
        input_function: input_type,
        ..Default::default()
      },
      input_type,
      reports_changes: true,
      update_interval: 0.0,
      state: None,
      last_update: None,
    }
  }

  pub fn set_update_interval(&mut self, seconds: f64) {
    self.update_interval = seconds;
  }

  /// Feed a hardware state. Returns true when the state actually changed
  /// and should be pushed upstream.
  pub fn update_input_state(&mut self, value: bool) -> bool {
    let changed = self.state != Some(value);
    self.state = Some(value);
    self.last_update = Some(Instant::now());
    if changed {
      info!(
        "binary input '{}' changed to {}",
        self.base.hardware_name, value
      );
    }
    changed
  }

  pub fn state(&self) -> Option<bool> {
    self.state
  }

  pub fn last_update(&self) -> Option<Instant> {
    self.last_update
  }
}

const INPUT_PROPS: [PropertyDescriptor; 6] = [
  PropertyDescriptor::field("name", PropertyType::String_, DESCRIPTION_KEY_OFFSET),
  PropertyDescriptor::field("type", PropertyType::String_, DESCRIPTION_KEY_OFFSET + 1),
  PropertyDescriptor::field("inputType", PropertyType::Int8, DESCRIPTION_KEY_OFFSET + 2),
  PropertyDescriptor::field("updateInterval", PropertyType::Double, DESCRIPTION_KEY_OFFSET + 3),
  PropertyDescriptor::field("function", PropertyType::Int8, SETTINGS_KEY_OFFSET),
  PropertyDescriptor::field("value", PropertyType::Bool, STATE_KEY_OFFSET),
];

impl PropertyContainer for BinaryInputBehaviour {
  fn descriptors(&self) -> &'static [PropertyDescriptor] {
    &INPUT_PROPS
  }

  fn read_field(&self, desc: &PropertyDescriptor, _index: usize) -> VdcResult<Value> {
    Ok(match desc.access_key {
      k if k == DESCRIPTION_KEY_OFFSET => Value::from(self.base.hardware_name.clone()),
      k if k == DESCRIPTION_KEY_OFFSET + 1 => Value::from(BehaviourKind::BinaryInput.type_name()),
      k if k == DESCRIPTION_KEY_OFFSET + 2 => Value::from(self.input_type as u8),
      k if k == DESCRIPTION_KEY_OFFSET + 3 => Value::from(self.update_interval),
      k if k == SETTINGS_KEY_OFFSET => Value::from(self.settings.input_function as u8),
      _ => self.state.map(Value::from).unwrap_or(Value::Null),
    })
  }

  fn write_field(&mut self, desc: &PropertyDescriptor, _index: usize, value: &Value) -> VdcResult<()> {
    use vdc_core::errors::VdcPropertyError;
    if desc.access_key == SETTINGS_KEY_OFFSET {
      self.settings.input_function = serde_json::from_value(value.clone())
        .map_err(|_| VdcPropertyError::TypeMismatch("function".into()))?;
      self.settings.mark_dirty();
      Ok(())
    } else {
      Err(VdcPropertyError::ReadOnly(desc.name.to_owned()).into())
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn test_edge_suppression() {
    let mut input = BinaryInputBehaviour::new(0, "Contact", DsGroup::RedSecurity, DsBinaryInputType::Smoke);
    assert!(input.update_input_state(true)); // first report is a change
    assert!(!input.update_input_state(true)); // duplicate suppressed
    assert!(input.update_input_state(false));
    assert_eq!(input.state(), Some(false));
  }
}
