// vdcd-rs Source Code File - Virtual Device Controller for digitalSTROM.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Output behaviour: the channel-bearing facet of a device. Owns the
//! channels, applies and captures scenes on them.

use std::time::Duration;

use rusqlite::types::Value as SqlValue;
use rusqlite::Row;
use serde_json::Value;

use vdc_core::dsdefs::{DsGroup, DsGroupMask, DsOutputFunction, DsOutputMode};
use vdc_core::VdcResult;

use super::channel::Channel;
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
use crate::scene::{Scene, SceneEffect};

/// Transition time used for scenes marked with the slow effect, and for
/// the slow-off scene command (fade down in one minute).
pub const SLOW_TRANSITION: Duration = Duration::from_secs(60);
/// Default smooth transition.
pub const SMOOTH_TRANSITION: Duration = Duration::from_millis(100);

/// Persisted output settings.
#[derive(Debug, Clone)]
pub struct OutputSettings {
  row_id: i64,
  dirty: bool,
  pub mode: DsOutputMode,
  /// Apply channel changes immediately on scene calls from any group in
  /// this mask.
  pub group_mask: DsGroupMask,
  /// Push output state changes upstream without being asked.
  pub push_changes: bool,
}

impl Default for OutputSettings {
  fn default() -> Self {
    Self {
      row_id: 0,
      dirty: false,
      mode: DsOutputMode::Gradual,
      group_mask: 1 << DsGroup::YellowLight as u64,
      push_changes: false,
    }
  }
}

const OUTPUT_SETTINGS_FIELDS: [FieldDef; 3] = [
  FieldDef::new("outputMode", FieldType::Integer),
  FieldDef::new("groupMask", FieldType::Integer),
  FieldDef::new("pushChanges", FieldType::Integer),
];

impl PersistedParams for OutputSettings {
  fn table_name(&self) -> &'static str {
    "outputSettings"
  }

  fn field_defs(&self) -> &'static [FieldDef] {
    &OUTPUT_SETTINGS_FIELDS
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
    let mode: i64 = row.get(*index).map_err(db_err)?;
    *index += 1;
    let mask: i64 = row.get(*index).map_err(db_err)?;
    *index += 1;
    let push: i64 = row.get(*index).map_err(db_err)?;
    *index += 1;
    self.mode = match mode {
      0 => DsOutputMode::Disabled,
      1 => DsOutputMode::Binary,
      _ => DsOutputMode::Gradual,
    };
    self.group_mask = mask as u64;
    self.push_changes = push != 0;
    Ok(())
  }

  fn field_values(&self) -> Vec<SqlValue> {
    vec![
      SqlValue::Integer(self.mode as i64),
      SqlValue::Integer(self.group_mask as i64),
      SqlValue::Integer(self.push_changes as i64),
    ]
  }
}

/// The output behaviour of a device: hardware facts, settings and the
/// owned channels. The first channel is the default channel.
#[derive(Debug, Clone)]
pub struct OutputBehaviour {
  pub base: BehaviourBase,
  pub settings: OutputSettings,
  pub function: DsOutputFunction,
  /// Set if the hardware supports a variable ramp time.
  pub variable_ramp: bool,
  /// Maximum output power in watts (0 = unknown).
  pub max_power: f64,
  /// Minimum brightness the hardware can produce while on (DALI min level).
  pub min_brightness: f64,
  channels: Vec<Channel>,
}

impl OutputBehaviour {
  pub fn new(hardware_name: &str, group: DsGroup, function: DsOutputFunction, channels: Vec<Channel>) -> Self {
    Self {
      base: BehaviourBase::new(0, hardware_name, group),
      settings: OutputSettings {
        group_mask: 1u64 << (group as u64),
        ..Default::default()
      },
      function,
      variable_ramp: function == DsOutputFunction::Dimmer,
      max_power: 0.0,
      min_brightness: 1.0,
      channels,
    }
  }

  pub fn channels(&self) -> &[Channel] {
    &self.channels
  }

  pub fn channels_mut(&mut self) -> &mut [Channel] {
    &mut self.channels
  }

  pub fn channel(&self, index: usize) -> Option<&Channel> {
    self.channels.get(index)
  }

  pub fn channel_mut(&mut self, index: usize) -> Option<&mut Channel> {
    self.channels.get_mut(index)
  }

  pub fn num_channels(&self) -> usize {
    self.channels.len()
  }

  /// True when the default channel shows a non-zero value.
  pub fn is_on(&self) -> bool {
    self
      .channels
      .first()
      .map(|c| c.cached_value() > c.descriptor().min)
      .unwrap_or(false)
  }

  fn transition_for(&self, effect: SceneEffect) -> Duration {
    match effect {
      SceneEffect::None => Duration::ZERO,
      SceneEffect::Slow => SLOW_TRANSITION,
      _ => SMOOTH_TRANSITION,
    }
  }

  /// Set channel targets from a scene, honoring the per-value dontCare
  /// flags. Values reach the hardware when the device's driver applies
  /// the channels afterwards.
  pub fn apply_scene(&mut self, scene: &Scene) {
    self.apply_scene_with_transition(scene, self.transition_for(scene.effect()));
  }

  /// Scene apply with an explicit transition time, for scene commands
  /// that prescribe their own timing (slow off).
  pub fn apply_scene_with_transition(&mut self, scene: &Scene, transition: Duration) {
    for (i, channel) in self.channels.iter_mut().enumerate() {
      if scene.value_dont_care(i) {
        continue;
      }
      channel.set_channel_value(scene.value(i), transition, false);
    }
  }

  /// Capture the current channel values into a scene (used for both
  /// saveScene and the undo pseudo scene).
  pub fn capture_scene(&self, scene: &mut Scene) {
    for (i, channel) in self.channels.iter().enumerate() {
      scene.record_value(i, channel.transitional_value());
    }
  }

  /// Behaviour-specific effects after a scene was applied (flashing
  /// etc.). The plain output has none beyond logging.
  pub fn perform_scene_actions(&mut self, scene: &Scene) {
    if scene.effect() == SceneEffect::Flash {
      info!("output '{}' would flash for scene {}", self.base.hardware_name, scene.scene_no());
    }
  }

  /// Switch on at minimum brightness if currently off (callSceneMin).
  pub fn on_at_min_brightness(&mut self) {
    if !self.is_on() {
      if let Some(channel) = self.channels.first_mut() {
        let min = self.min_brightness;
        channel.set_channel_value(min, SMOOTH_TRANSITION, true);
      }
    }
  }

  /// Dim the default channel one step (dim scene handling). Step size is
  /// the channel's dimming rate times the dim repeat interval.
  pub fn dim_channel(&mut self, up: bool) {
    if let Some(channel) = self.channels.first_mut() {
      let step = channel.descriptor().dim_per_ms * 300.0 * if up { 1.0 } else { -1.0 };
      channel.dim_channel_value(step, Duration::from_millis(300));
    }
  }
}

const OUTPUT_PROPS: [PropertyDescriptor; 7] = [
  PropertyDescriptor::field("name", PropertyType::String_, DESCRIPTION_KEY_OFFSET),
  PropertyDescriptor::field("type", PropertyType::String_, DESCRIPTION_KEY_OFFSET + 1),
  PropertyDescriptor::field("function", PropertyType::Int8, DESCRIPTION_KEY_OFFSET + 2),
  PropertyDescriptor::field("variableRamp", PropertyType::Bool, DESCRIPTION_KEY_OFFSET + 3),
  PropertyDescriptor::field("mode", PropertyType::Int8, SETTINGS_KEY_OFFSET),
  PropertyDescriptor::field("pushChanges", PropertyType::Bool, SETTINGS_KEY_OFFSET + 1),
  PropertyDescriptor::array("channelValues", PropertyType::Double, STATE_KEY_OFFSET),
];

impl PropertyContainer for OutputBehaviour {
  fn descriptors(&self) -> &'static [PropertyDescriptor] {
    &OUTPUT_PROPS
  }

  fn array_size(&self, desc: &PropertyDescriptor) -> usize {
    if desc.access_key == STATE_KEY_OFFSET {
      self.channels.len()
    } else {
      0
    }
  }

  fn read_field(&self, desc: &PropertyDescriptor, index: usize) -> VdcResult<Value> {
    Ok(match desc.access_key {
      k if k == DESCRIPTION_KEY_OFFSET => Value::from(self.base.hardware_name.clone()),
      k if k == DESCRIPTION_KEY_OFFSET + 1 => Value::from(BehaviourKind::Output.type_name()),
      k if k == DESCRIPTION_KEY_OFFSET + 2 => Value::from(self.function as u8),
      k if k == DESCRIPTION_KEY_OFFSET + 3 => Value::from(self.variable_ramp),
      k if k == SETTINGS_KEY_OFFSET => Value::from(self.settings.mode as u8),
      k if k == SETTINGS_KEY_OFFSET + 1 => Value::from(self.settings.push_changes),
      _ => Value::from(self.channels.get(index).map(|c| c.cached_value()).unwrap_or(0.0)),
    })
  }

  fn write_field(&mut self, desc: &PropertyDescriptor, index: usize, value: &Value) -> VdcResult<()> {
    use vdc_core::errors::VdcPropertyError;
    match desc.access_key {
      k if k == SETTINGS_KEY_OFFSET => {
        self.settings.mode = match value.as_i64() {
          Some(0) => DsOutputMode::Disabled,
          Some(1) => DsOutputMode::Binary,
          Some(2) => DsOutputMode::Gradual,
          _ => return Err(VdcPropertyError::TypeMismatch("mode".into()).into()),
        };
        self.settings.mark_dirty();
        Ok(())
      }
      k if k == SETTINGS_KEY_OFFSET + 1 => {
        self.settings.push_changes = value
          .as_bool()
          .ok_or_else(|| VdcPropertyError::TypeMismatch("pushChanges".into()))?;
        self.settings.mark_dirty();
        Ok(())
      }
      k if k == STATE_KEY_OFFSET => {
        let v = value
          .as_f64()
          .ok_or_else(|| VdcPropertyError::TypeMismatch("channelValues".into()))?;
        let channel = self
          .channels
          .get_mut(index)
          .ok_or(VdcPropertyError::IndexOutOfRange(index))?;
        channel.set_channel_value(v, Duration::ZERO, false);
        Ok(())
      }
      _ => Err(VdcPropertyError::ReadOnly(desc.name.to_owned()).into()),
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::behaviour::channel::ChannelDescriptor;
  use crate::scene::SceneTable;

  fn light_output() -> OutputBehaviour {
    OutputBehaviour::new(
      "Light",
      DsGroup::YellowLight,
      DsOutputFunction::Dimmer,
      vec![Channel::new(ChannelDescriptor::brightness())],
    )
  }

  #[test]
  fn test_apply_scene_honors_dont_care() {
    let table = SceneTable::new(1);
    let mut output = light_output();
    let scene_on = table.get_scene(vdc_core::dsdefs::T0_S1);
    output.apply_scene(&scene_on);
    assert_eq!(output.channels()[0].cached_value(), 100.0);

    // per-value dontCare leaves the channel untouched
    let mut scene = table.get_scene(vdc_core::dsdefs::T0_S0);
    scene.set_value_dont_care(0, true);
    output.apply_scene(&scene);
    assert_eq!(output.channels()[0].cached_value(), 100.0);
  }

  #[test]
  fn test_capture_scene() {
    let table = SceneTable::new(1);
    let mut output = light_output();
    output.channels_mut()[0].set_channel_value(42.0, Duration::ZERO, true);
    let mut scene = table.get_scene(17);
    output.capture_scene(&mut scene);
    assert_eq!(scene.value(0), 42.0);
    assert!(scene.dirty());
  }

  #[test]
  fn test_on_at_min_brightness() {
    let mut output = light_output();
    output.min_brightness = 12.0;
    output.on_at_min_brightness();
    assert_eq!(output.channels()[0].cached_value(), 12.0);
    // already on: no change
    output.channels_mut()[0].set_channel_value(80.0, Duration::ZERO, true);
    output.on_at_min_brightness();
    assert_eq!(output.channels()[0].cached_value(), 80.0);
  }
}
