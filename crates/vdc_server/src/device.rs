// vdcd-rs Source Code File - Virtual Device Controller for digitalSTROM.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The device aggregate: behaviours, scene table, scene call pipeline
//! and hardware driver binding.
//!
//! A `Device` is the pure dS-side model. Technology specifics are
//! supplied through an [OutputDriver] for the output path; input paths
//! (buttons, sensors) are fed by the technology's packet handlers calling
//! into the behaviours. Within one device, output-affecting operations
//! serialize: the undo state is always captured before a scene's target
//! values reach the hardware.

use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;

use vdc_core::dsdefs::{
  area_from_scene,
  is_area_off_scene,
  main_dim_scene,
  main_scene_for_area,
  DsClickType,
  DsGroup,
  DsGroupMask,
  SceneNo,
  T1234_CONT,
};
use vdc_core::ident::DsUid;
use vdc_core::VdcResult;

use crate::behaviour::button::KeyId;
use crate::behaviour::{
  BinaryInputBehaviour,
  ButtonBehaviour,
  ButtonEvent,
  Channel,
  OutputBehaviour,
  SensorBehaviour,
};
use crate::persist::{ParamStore, PersistedParams};
use crate::property::{
  PropertyContainer,
  PropertyDescriptor,
  PropertyType,
  PropIndex,
  DESCRIPTION_KEY_OFFSET,
  SETTINGS_KEY_OFFSET,
  STATE_KEY_OFFSET,
};
use crate::scene::{DeviceSettings, Scene, SceneCmd, SceneTable};

/// Technology side of a device's output path. Implementations write the
/// pending channel values to the hardware; they must not block the core
/// beyond awaiting their own I/O.
#[async_trait(?Send)]
pub trait OutputDriver: Send {
  /// Write all pending channel values to the hardware.
  async fn apply_channels(&mut self, channels: &mut [Channel]) -> VdcResult<()>;

  /// Read back actual values into the channel cache.
  async fn sync_channels(&mut self, _channels: &mut [Channel]) -> VdcResult<()> {
    Ok(())
  }

  /// Make the physical device identifiable to the user.
  async fn identify(&mut self) {}

  /// Probe whether the hardware is reachable.
  async fn check_presence(&mut self) -> bool {
    true
  }

  /// Ask the hardware to disconnect/unlearn. Returns true when the
  /// device is actually gone; hard-wired devices refuse.
  async fn disconnect(&mut self, _forget: bool) -> bool {
    false
  }
}

/// State changes a device wants pushed upstream.
#[derive(Debug, Clone, PartialEq)]
pub enum DevicePush {
  ButtonClick {
    index: usize,
    click: DsClickType,
    key: KeyId,
  },
  InputState {
    index: usize,
    value: bool,
  },
  SensorValue {
    index: usize,
    value: f64,
  },
}

/// One dS device: behaviours, settings, scenes and its hardware binding.
pub struct Device {
  dsuid: DsUid,
  vdc_class_id: String,
  device_type_id: String,
  behaviour_type_id: &'static str,
  primary_group: DsGroup,
  group_membership: DsGroupMask,
  pub buttons: Vec<ButtonBehaviour>,
  pub binary_inputs: Vec<BinaryInputBehaviour>,
  pub sensors: Vec<SensorBehaviour>,
  pub output: Option<OutputBehaviour>,
  driver: Option<Box<dyn OutputDriver>>,
  pub settings: DeviceSettings,
  local_priority: bool,
  prog_mode: bool,
  last_dim_scene: SceneNo,
  undo_scene: Option<Scene>,
  announced: Option<Instant>,
  announcing: Option<Instant>,
  is_public: bool,
}

impl Device {
  pub fn new(dsuid: DsUid, vdc_class_id: &str, device_type_id: &str, primary_group: DsGroup) -> Self {
    Self {
      dsuid,
      vdc_class_id: vdc_class_id.to_owned(),
      device_type_id: device_type_id.to_owned(),
      behaviour_type_id: "output",
      primary_group,
      group_membership: 1u64 << (primary_group as u64),
      buttons: Vec::new(),
      binary_inputs: Vec::new(),
      sensors: Vec::new(),
      output: None,
      driver: None,
      settings: DeviceSettings::new(None),
      local_priority: false,
      prog_mode: false,
      last_dim_scene: 0,
      undo_scene: None,
      announced: None,
      announcing: None,
      is_public: true,
    }
  }

  pub fn dsuid(&self) -> &DsUid {
    &self.dsuid
  }

  pub fn vdc_class_id(&self) -> &str {
    &self.vdc_class_id
  }

  pub fn device_type_id(&self) -> &str {
    &self.device_type_id
  }

  pub fn primary_group(&self) -> DsGroup {
    self.primary_group
  }

  pub fn group_membership(&self) -> DsGroupMask {
    self.group_membership
  }

  pub fn set_group_membership(&mut self, mask: DsGroupMask) {
    self.group_membership = mask;
  }

  pub fn local_priority(&self) -> bool {
    self.local_priority
  }

  pub fn prog_mode(&self) -> bool {
    self.prog_mode
  }

  pub fn set_prog_mode(&mut self, enabled: bool) {
    self.prog_mode = enabled;
  }

  pub fn is_public(&self) -> bool {
    self.is_public
  }

  pub fn set_public(&mut self, public: bool) {
    self.is_public = public;
  }

  pub fn name(&self) -> &str {
    &self.settings.name
  }

  pub fn set_name(&mut self, name: &str) {
    if self.settings.name != name {
      self.settings.name = name.to_owned();
      self.settings.mark_dirty();
    }
  }

  /// Attach the output behaviour with a matching scene table.
  pub fn set_output(&mut self, output: OutputBehaviour, with_scenes: bool) {
    let num_channels = output.num_channels();
    self.behaviour_type_id = if output.channels().first().map(|c| c.descriptor().name) == Some("brightness") {
      "light"
    } else {
      "output"
    };
    self.output = Some(output);
    if with_scenes {
      self.settings.scene_table = Some(SceneTable::new(num_channels));
    }
  }

  pub fn set_driver(&mut self, driver: Box<dyn OutputDriver>) {
    self.driver = Some(driver);
  }

  pub fn add_button(&mut self, button: ButtonBehaviour) {
    self.buttons.push(button);
  }

  pub fn add_binary_input(&mut self, input: BinaryInputBehaviour) {
    self.binary_inputs.push(input);
  }

  pub fn add_sensor(&mut self, sensor: SensorBehaviour) {
    self.sensors.push(sensor);
  }

  // --- announce bookkeeping ----------------------------------------------

  pub fn announced(&self) -> Option<Instant> {
    self.announced
  }

  pub fn announcing(&self) -> Option<Instant> {
    self.announcing
  }

  pub fn set_announcing(&mut self, at: Option<Instant>) {
    self.announcing = at;
  }

  pub fn set_announced(&mut self, at: Option<Instant>) {
    self.announced = at;
  }

  /// Forget announce state (session ended).
  pub fn reset_announcement(&mut self) {
    self.announced = None;
    self.announcing = None;
  }

  // --- scene call pipeline -----------------------------------------------

  /// Call a scene on this device, honoring area membership, local
  /// priority, dontCare and the dim-scene normalization.
  pub async fn call_scene(&mut self, scene_no: SceneNo, force: bool) {
    let Some(table) = self.settings.scene_table.as_ref() else {
      return;
    };
    info!("{}: callScene({})", self.dsuid, scene_no);
    let mut scene_no = scene_no;
    if scene_no == T1234_CONT {
      if self.last_dim_scene != 0 {
        scene_no = self.last_dim_scene;
      } else {
        // dimming was not started in this device
        debug!("- area continue without prior dimming, ignored");
        return;
      }
    }
    let dim_scene_no = main_dim_scene(scene_no);
    self.last_dim_scene = 0;
    let area = area_from_scene(scene_no);
    if area != 0 {
      // area membership is decided by the area main (on) scene's dontCare
      let area_main = table.get_scene(main_scene_for_area(area));
      if area_main.dont_care() {
        debug!("- not in area {area}, scene call suppressed");
        return;
      }
      if is_area_off_scene(scene_no) {
        debug!("- area off scene ends local priority");
        self.local_priority = false;
      }
    }
    let scene = if dim_scene_no != 0 {
      if area != 0 {
        self.last_dim_scene = scene_no;
      }
      table.get_scene(dim_scene_no)
    } else {
      table.get_scene(scene_no)
    };
    if !scene.dont_care() {
      if area == 0 && self.local_priority && !scene.ignores_local_priority() && !force {
        debug!("- local priority, scene call suppressed");
        return;
      }
      if dim_scene_no == 0 {
        // capture the undo state before any target value reaches the
        // hardware; dim scenes have no undo
        self.capture_undo_state(scene_no);
      }
      self.apply_scene_to_output(&scene).await;
    }
    if let Some(output) = self.output.as_mut() {
      output.perform_scene_actions(&scene);
    }
  }

  fn capture_undo_state(&mut self, scene_no: SceneNo) {
    let Some(table) = self.settings.scene_table.as_ref() else {
      return;
    };
    let mut undo = self
      .undo_scene
      .take()
      .unwrap_or_else(|| table.new_default_scene(scene_no));
    undo.set_scene_no(scene_no);
    if let Some(output) = self.output.as_ref() {
      output.capture_scene(&mut undo);
    }
    self.undo_scene = Some(undo);
  }

  async fn apply_scene_to_output(&mut self, scene: &Scene) {
    {
      let Some(output) = self.output.as_mut() else {
        return;
      };
      match scene.cmd() {
        SceneCmd::None => {
          // reserved scene, no output change
          return;
        }
        SceneCmd::Increment => output.dim_channel(true),
        SceneCmd::Decrement => output.dim_channel(false),
        SceneCmd::Stop => {
          for channel in output.channels_mut() {
            channel.set_transition_progress(1.0);
          }
        }
        SceneCmd::Min => {
          let min = output.min_brightness;
          if let Some(channel) = output.channels_mut().first_mut() {
            channel.set_channel_value(min, std::time::Duration::ZERO, false);
          }
        }
        SceneCmd::Max => {
          if let Some(channel) = output.channels_mut().first_mut() {
            let max = channel.descriptor().max;
            channel.set_channel_value(max, std::time::Duration::ZERO, false);
          }
        }
        SceneCmd::SlowOff => {
          // fade down over a minute regardless of the scene effect
          output.apply_scene_with_transition(scene, crate::behaviour::output::SLOW_TRANSITION);
        }
        _ => output.apply_scene(scene),
      }
    }
    self.apply_channel_values().await;
  }

  /// Flush pending channel values through the driver and confirm them.
  pub async fn apply_channel_values(&mut self) {
    let (Some(output), Some(driver)) = (self.output.as_mut(), self.driver.as_mut()) else {
      return;
    };
    if !output.channels().iter().any(Channel::needs_applying) {
      return;
    }
    match driver.apply_channels(output.channels_mut()).await {
      Ok(()) => {
        for channel in output.channels_mut() {
          if channel.needs_applying() {
            channel.channel_value_applied(false);
          }
        }
      }
      Err(e) => warn!("{}: applying channel values failed: {}", self.dsuid, e),
    }
  }

  /// Capture the current output state into scene `scene_no` and persist
  /// it when it actually changed.
  pub fn save_scene(&mut self, scene_no: SceneNo) {
    info!("{}: saveScene({})", self.dsuid, scene_no);
    let Some(table) = self.settings.scene_table.as_ref() else {
      return;
    };
    let mut scene = table.get_scene(scene_no);
    if let Some(output) = self.output.as_ref() {
      output.capture_scene(&mut scene);
    }
    if scene.dirty() {
      if let Some(table) = self.settings.scene_table.as_mut() {
        table.update_scene(scene);
      }
      if self.settings.row_id() == 0 {
        // the scene children need the settings row's rowid to persist
        self.settings.mark_dirty();
      }
    }
  }

  /// Apply the undo pseudo scene if it was captured for `scene_no`.
  pub async fn undo_scene(&mut self, scene_no: SceneNo) {
    info!("{}: undoScene({})", self.dsuid, scene_no);
    let undo = match self.undo_scene.as_ref() {
      Some(u) if u.scene_no() == scene_no => u.clone(),
      _ => return,
    };
    if let Some(output) = self.output.as_mut() {
      output.apply_scene(&undo);
    }
    self.apply_channel_values().await;
  }

  /// Set local priority unless the scene is dontCare for this device.
  pub fn set_local_priority(&mut self, scene_no: SceneNo) {
    let Some(table) = self.settings.scene_table.as_ref() else {
      return;
    };
    if !table.get_scene(scene_no).dont_care() {
      debug!("{}: localPriority set via scene {}", self.dsuid, scene_no);
      self.local_priority = true;
    }
  }

  /// Switch on at minimum brightness unless dontCare for `scene_no`.
  pub async fn call_scene_min(&mut self, scene_no: SceneNo) {
    let Some(table) = self.settings.scene_table.as_ref() else {
      return;
    };
    if table.get_scene(scene_no).dont_care() {
      return;
    }
    if let Some(output) = self.output.as_mut() {
      output.on_at_min_brightness();
    }
    self.apply_channel_values().await;
  }

  /// Route a named control value (e.g. "brightness") onto a channel.
  pub async fn set_control_value(&mut self, name: &str, value: f64) {
    let mut touched = false;
    if let Some(output) = self.output.as_mut() {
      for channel in output.channels_mut() {
        if channel.descriptor().name == name {
          channel.set_channel_value(value, std::time::Duration::ZERO, false);
          touched = true;
        }
      }
    }
    if touched {
      self.apply_channel_values().await;
    } else {
      debug!("{}: control value '{}' not handled", self.dsuid, name);
    }
  }

  pub async fn identify(&mut self) {
    if let Some(driver) = self.driver.as_mut() {
      driver.identify().await;
    } else {
      info!("{}: identify called (no hardware identification)", self.dsuid);
    }
  }

  pub async fn check_presence(&mut self) -> bool {
    match self.driver.as_mut() {
      Some(driver) => driver.check_presence().await,
      None => true,
    }
  }

  /// Ask the hardware to disconnect. Returns true when the device is
  /// gone and should vanish from the containers.
  pub async fn disconnect(&mut self, forget: bool) -> bool {
    match self.driver.as_mut() {
      Some(driver) => driver.disconnect(forget).await,
      None => true,
    }
  }

  // --- button handling -----------------------------------------------------

  /// Feed a button edge, translating machine emissions into pushes and
  /// local output actions.
  pub async fn process_button_edge(
    &mut self,
    index: usize,
    pressed: bool,
    second_key: bool,
    now_ms: u64,
  ) -> Vec<DevicePush> {
    let output_on = self.output.as_ref().map(OutputBehaviour::is_on).unwrap_or(false);
    let events = match self.buttons.get_mut(index) {
      Some(button) => {
        button.machine.set_output_on(output_on);
        button.button_action(pressed, second_key, now_ms)
      }
      None => return Vec::new(),
    };
    self.handle_button_events(index, events).await
  }

  /// Advance button timers; to be called every 10 ms while
  /// [Self::buttons_want_timer] is true.
  pub async fn process_button_timers(&mut self, now_ms: u64) -> Vec<DevicePush> {
    let mut pushes = Vec::new();
    for index in 0..self.buttons.len() {
      let events = match self.buttons.get_mut(index) {
        Some(button) if button.machine.wants_timer() => button.timer_tick(now_ms),
        _ => continue,
      };
      pushes.extend(self.handle_button_events(index, events).await);
    }
    pushes
  }

  pub fn buttons_want_timer(&self) -> bool {
    self.buttons.iter().any(|b| b.machine.wants_timer())
  }

  async fn handle_button_events(&mut self, index: usize, events: Vec<ButtonEvent>) -> Vec<DevicePush> {
    let mut pushes = Vec::new();
    for event in events {
      match event {
        ButtonEvent::Click(click) => {
          let key = self.buttons.get(index).map(ButtonBehaviour::key_id).unwrap_or(KeyId::OneWay);
          pushes.push(DevicePush::ButtonClick { index, click, key });
        }
        ButtonEvent::LocalSwitch(on) => {
          if let Some(output) = self.output.as_mut() {
            if let Some(channel) = output.channels_mut().first_mut() {
              let target = if on { channel.descriptor().max } else { channel.descriptor().min };
              channel.set_channel_value(target, std::time::Duration::ZERO, true);
            }
          }
          self.apply_channel_values().await;
        }
        ButtonEvent::LocalDim(up) => {
          if let Some(output) = self.output.as_mut() {
            output.dim_channel(up);
          }
          self.apply_channel_values().await;
        }
      }
    }
    pushes
  }

  // --- persistence ---------------------------------------------------------

  fn behaviour_parent_id(&self, index: usize) -> String {
    format!("{}_{}", self.dsuid, index)
  }

  /// Load settings and scenes from the shared parameter store, then
  /// apply the scene override files from `data_dir`.
  pub fn load_settings(&mut self, store: &ParamStore, data_dir: &Path) -> VdcResult<()> {
    let parent = self.dsuid.to_string();
    self.settings.load_from_store(store, &parent)?;
    for i in 0..self.buttons.len() {
      let id = self.behaviour_parent_id(i);
      self.buttons[i].settings.load_from_store(store, &id)?;
    }
    for i in 0..self.binary_inputs.len() {
      let id = self.behaviour_parent_id(i);
      self.binary_inputs[i].settings.load_from_store(store, &id)?;
    }
    if let Some(output) = self.output.as_mut() {
      output.settings.load_from_store(store, &parent)?;
    }
    // file-based scene customization, most specific level first
    let levels = [
      format!("vdsd_{}", self.dsuid),
      format!("{}_device", self.device_type_id),
      format!("{}_behaviour", self.behaviour_type_id),
      self.vdc_class_id.clone(),
    ];
    if let Some(table) = self.settings.scene_table.as_mut() {
      table.load_scenes_from_files(data_dir, &levels);
    }
    Ok(())
  }

  /// Save dirty settings; cheap no-op for clean devices.
  pub fn save_settings(&mut self, store: &ParamStore) -> VdcResult<()> {
    let parent = self.dsuid.to_string();
    self.settings.save_to_store(store, &parent)?;
    for i in 0..self.buttons.len() {
      let id = self.behaviour_parent_id(i);
      self.buttons[i].settings.save_to_store(store, &id)?;
    }
    for i in 0..self.binary_inputs.len() {
      let id = self.behaviour_parent_id(i);
      self.binary_inputs[i].settings.save_to_store(store, &id)?;
    }
    if let Some(output) = self.output.as_mut() {
      output.settings.save_to_store(store, &parent)?;
    }
    Ok(())
  }

  /// Remove all persisted traces of this device.
  pub fn forget_settings(&mut self, store: &ParamStore) -> VdcResult<()> {
    self.settings.delete_from_store(store)?;
    for button in self.buttons.iter_mut() {
      button.settings.delete_from_store(store)?;
    }
    for input in self.binary_inputs.iter_mut() {
      input.settings.delete_from_store(store)?;
    }
    if let Some(output) = self.output.as_mut() {
      output.settings.delete_from_store(store)?;
    }
    Ok(())
  }
}

impl std::fmt::Debug for Device {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Device")
      .field("dsuid", &self.dsuid.to_string())
      .field("type", &self.device_type_id)
      .field("buttons", &self.buttons.len())
      .field("binary_inputs", &self.binary_inputs.len())
      .field("sensors", &self.sensors.len())
      .field("has_output", &self.output.is_some())
      .finish()
  }
}

// Property tree of a device.
const DEVICE_PROPS: [PropertyDescriptor; 12] = [
  PropertyDescriptor::field("dSUID", PropertyType::String_, DESCRIPTION_KEY_OFFSET),
  PropertyDescriptor::field("type", PropertyType::String_, DESCRIPTION_KEY_OFFSET + 1),
  PropertyDescriptor::field("primaryGroup", PropertyType::Int8, DESCRIPTION_KEY_OFFSET + 2),
  PropertyDescriptor::field("name", PropertyType::String_, SETTINGS_KEY_OFFSET),
  PropertyDescriptor::field("zoneID", PropertyType::Int64, SETTINGS_KEY_OFFSET + 1),
  PropertyDescriptor::array("scenes", PropertyType::Object, SETTINGS_KEY_OFFSET + 2),
  PropertyDescriptor::field("localPriority", PropertyType::Bool, STATE_KEY_OFFSET),
  PropertyDescriptor::field("progMode", PropertyType::Bool, STATE_KEY_OFFSET + 1),
  PropertyDescriptor::array("buttons", PropertyType::Object, STATE_KEY_OFFSET + 2),
  PropertyDescriptor::array("binaryInputs", PropertyType::Object, STATE_KEY_OFFSET + 3),
  PropertyDescriptor::array("sensors", PropertyType::Object, STATE_KEY_OFFSET + 4),
  PropertyDescriptor::array("outputs", PropertyType::Object, STATE_KEY_OFFSET + 5),
];

const SCENES_KEY: u16 = SETTINGS_KEY_OFFSET + 2;

impl PropertyContainer for Device {
  fn descriptors(&self) -> &'static [PropertyDescriptor] {
    &DEVICE_PROPS
  }

  fn array_size(&self, desc: &PropertyDescriptor) -> usize {
    match desc.access_key {
      SCENES_KEY => {
        if self.settings.scene_table.is_some() {
          128
        } else {
          0
        }
      }
      k if k == STATE_KEY_OFFSET + 2 => self.buttons.len(),
      k if k == STATE_KEY_OFFSET + 3 => self.binary_inputs.len(),
      k if k == STATE_KEY_OFFSET + 4 => self.sensors.len(),
      k if k == STATE_KEY_OFFSET + 5 => usize::from(self.output.is_some()),
      _ => 0,
    }
  }

  /// Scenes are synthesized on demand, so element access bypasses the
  /// container lookup: reads serialize the (default or stored) scene,
  /// writes go through [SceneTable::update_scene] so the table and the
  /// owning settings row get marked dirty.
  fn read_custom(&self, desc: &PropertyDescriptor, index: usize) -> Option<VdcResult<Value>> {
    use vdc_core::errors::VdcPropertyError;
    if desc.access_key != SCENES_KEY {
      return None;
    }
    if index >= self.array_size(desc) {
      return Some(Err(VdcPropertyError::IndexOutOfRange(index).into()));
    }
    let table = self.settings.scene_table.as_ref()?;
    let scene = table.get_scene(index as SceneNo);
    Some(Ok(serde_json::json!({
      "value": scene.value(0),
      "dontCare": scene.dont_care(),
      "ignoreLocalPriority": scene.ignores_local_priority(),
      "effect": scene.effect() as u8,
    })))
  }

  fn write_custom(&mut self, desc: &PropertyDescriptor, index: PropIndex, value: &Value) -> Option<VdcResult<()>> {
    use vdc_core::errors::VdcPropertyError;
    if desc.access_key != SCENES_KEY {
      return None;
    }
    let PropIndex::At(scene_no) = index else {
      return Some(Err(VdcPropertyError::TypeMismatch("scenes".into()).into()));
    };
    if scene_no >= self.array_size(desc) {
      return Some(Err(VdcPropertyError::IndexOutOfRange(scene_no).into()));
    }
    let Some(obj) = value.as_object() else {
      return Some(Err(VdcPropertyError::TypeMismatch("scenes".into()).into()));
    };
    let table = self.settings.scene_table.as_mut()?;
    let mut scene = table.get_scene(scene_no as SceneNo);
    if let Some(v) = obj.get("value").and_then(Value::as_f64) {
      scene.set_value(0, v);
    }
    if let Some(v) = obj.get("dontCare").and_then(Value::as_bool) {
      scene.set_dont_care(v);
    }
    if let Some(v) = obj.get("ignoreLocalPriority").and_then(Value::as_bool) {
      scene.set_ignore_local_priority(v);
    }
    table.update_scene(scene);
    if self.settings.row_id() == 0 {
      self.settings.mark_dirty();
    }
    Some(Ok(()))
  }

  fn read_field(&self, desc: &PropertyDescriptor, _index: usize) -> VdcResult<Value> {
    Ok(match desc.access_key {
      k if k == DESCRIPTION_KEY_OFFSET => Value::from(self.dsuid.to_string()),
      k if k == DESCRIPTION_KEY_OFFSET + 1 => Value::from("vdSD"),
      k if k == DESCRIPTION_KEY_OFFSET + 2 => Value::from(self.primary_group as u8),
      k if k == SETTINGS_KEY_OFFSET => Value::from(self.settings.name.clone()),
      k if k == SETTINGS_KEY_OFFSET + 1 => Value::from(self.settings.zone_id),
      k if k == STATE_KEY_OFFSET => Value::from(self.local_priority),
      _ => Value::from(self.prog_mode),
    })
  }

  fn write_field(&mut self, desc: &PropertyDescriptor, _index: usize, value: &Value) -> VdcResult<()> {
    use vdc_core::errors::VdcPropertyError;
    match desc.access_key {
      k if k == SETTINGS_KEY_OFFSET => {
        let name = value
          .as_str()
          .ok_or_else(|| VdcPropertyError::TypeMismatch("name".into()))?;
        self.set_name(name);
        Ok(())
      }
      k if k == SETTINGS_KEY_OFFSET + 1 => {
        self.settings.zone_id = value
          .as_i64()
          .ok_or_else(|| VdcPropertyError::TypeMismatch("zoneID".into()))?;
        self.settings.mark_dirty();
        Ok(())
      }
      k if k == STATE_KEY_OFFSET => {
        self.local_priority = value
          .as_bool()
          .ok_or_else(|| VdcPropertyError::TypeMismatch("localPriority".into()))?;
        Ok(())
      }
      k if k == STATE_KEY_OFFSET + 1 => {
        self.prog_mode = value
          .as_bool()
          .ok_or_else(|| VdcPropertyError::TypeMismatch("progMode".into()))?;
        Ok(())
      }
      _ => Err(VdcPropertyError::ReadOnly(desc.name.to_owned()).into()),
    }
  }

  fn container(&self, desc: &PropertyDescriptor, index: usize) -> Option<&dyn PropertyContainer> {
    match desc.access_key {
      k if k == STATE_KEY_OFFSET + 2 => self.buttons.get(index).map(|b| b as &dyn PropertyContainer),
      k if k == STATE_KEY_OFFSET + 3 => self.binary_inputs.get(index).map(|b| b as &dyn PropertyContainer),
      k if k == STATE_KEY_OFFSET + 4 => self.sensors.get(index).map(|b| b as &dyn PropertyContainer),
      k if k == STATE_KEY_OFFSET + 5 && index == 0 => {
        self.output.as_ref().map(|o| o as &dyn PropertyContainer)
      }
      _ => None,
    }
  }

  fn container_mut(&mut self, desc: &PropertyDescriptor, index: usize) -> Option<&mut dyn PropertyContainer> {
    match desc.access_key {
      k if k == STATE_KEY_OFFSET + 2 => self.buttons.get_mut(index).map(|b| b as &mut dyn PropertyContainer),
      k if k == STATE_KEY_OFFSET + 3 => {
        self.binary_inputs.get_mut(index).map(|b| b as &mut dyn PropertyContainer)
      }
      k if k == STATE_KEY_OFFSET + 4 => self.sensors.get_mut(index).map(|b| b as &mut dyn PropertyContainer),
      k if k == STATE_KEY_OFFSET + 5 && index == 0 => {
        self.output.as_mut().map(|o| o as &mut dyn PropertyContainer)
      }
      _ => None,
    }
  }
}

#[cfg(test)]
pub(crate) mod test {
  use super::*;
  use crate::behaviour::channel::ChannelDescriptor;
  use std::sync::{Arc, Mutex};
  use vdc_core::dsdefs::{self, DsOutputFunction, T0_S1};

  /// Records every channel set that reaches the "hardware".
  pub(crate) struct MockDriver {
    pub applied: Arc<Mutex<Vec<f64>>>,
  }

  #[async_trait(?Send)]
  impl OutputDriver for MockDriver {
    async fn apply_channels(&mut self, channels: &mut [Channel]) -> VdcResult<()> {
      for channel in channels.iter() {
        if channel.needs_applying() {
          self.applied.lock().expect("lock").push(channel.cached_value());
        }
      }
      Ok(())
    }
  }

  pub(crate) fn light_device() -> (Device, Arc<Mutex<Vec<f64>>>) {
    let mut device = Device::new(
      DsUid::classic(0x000001, 0x1234),
      "test_class",
      "test_dimmer",
      DsGroup::YellowLight,
    );
    let output = OutputBehaviour::new(
      "Light",
      DsGroup::YellowLight,
      DsOutputFunction::Dimmer,
      vec![Channel::new(ChannelDescriptor::brightness())],
    );
    let applied = Arc::new(Mutex::new(Vec::new()));
    device.set_output(output, true);
    device.set_driver(Box::new(MockDriver { applied: applied.clone() }));
    (device, applied)
  }

  #[tokio::test]
  async fn test_scene_call_applies_value() {
    let (mut device, applied) = light_device();
    device.call_scene(T0_S1, false).await;
    assert_eq!(applied.lock().expect("lock").as_slice(), &[100.0]);
    // undo state was captured for scene 5
    assert_eq!(device.undo_scene.as_ref().expect("undo").scene_no(), T0_S1);
  }

  #[tokio::test]
  async fn test_local_priority_suppresses_and_force_overrides() {
    let (mut device, applied) = light_device();
    device.local_priority = true;
    // scene 5 (preset 1) does not ignore local priority
    device.call_scene(T0_S1, false).await;
    assert!(applied.lock().expect("lock").is_empty());
    assert!(device.undo_scene.is_none()); // no undo captured either
    // forced call goes through: undo captured, then value applied
    device.call_scene(T0_S1, true).await;
    assert_eq!(applied.lock().expect("lock").as_slice(), &[100.0]);
    assert!(device.undo_scene.is_some());
  }

  #[tokio::test]
  async fn test_area_membership_and_off_clears_local_priority() {
    let (mut device, applied) = light_device();
    // not in area 1 yet: area-on scene defaults are cared-for... area
    // membership is decided by T1_S1's dontCare, which defaults to false,
    // so the device IS in area 1 by default
    device.local_priority = true;
    device.call_scene(dsdefs::T1_S0, false).await; // area 1 off
    assert!(!device.local_priority());
    assert_eq!(applied.lock().expect("lock").as_slice(), &[0.0]);

    // mark the device as not in area 2 and verify suppression
    {
      let table = device.settings.scene_table.as_mut().expect("table");
      let mut area2_on = table.get_scene(dsdefs::T2_S1);
      area2_on.set_dont_care(true);
      table.update_scene(area2_on);
    }
    applied.lock().expect("lock").clear();
    device.local_priority = true;
    device.call_scene(dsdefs::T2_S0, false).await;
    assert!(applied.lock().expect("lock").is_empty());
    assert!(device.local_priority()); // untouched, call was suppressed
  }

  #[tokio::test]
  async fn test_undo_scene() {
    let (mut device, applied) = light_device();
    device.call_scene(T0_S1, false).await; // on (100%), undo captured at 0
    device.undo_scene(T0_S1).await;
    let values = applied.lock().expect("lock").clone();
    assert_eq!(values, vec![100.0, 0.0]);
  }

  #[tokio::test]
  async fn test_area_dimming_and_continue() {
    let (mut device, applied) = light_device();
    device.call_scene(T0_S1, false).await; // on
    applied.lock().expect("lock").clear();
    device.call_scene(dsdefs::T1_INC, false).await; // area dim up
    assert_eq!(device.last_dim_scene, dsdefs::T1_INC);
    assert_eq!(applied.lock().expect("lock").len(), 1);
    // T1234_CONT repeats the last area dim
    device.call_scene(T1234_CONT, false).await;
    assert_eq!(device.last_dim_scene, dsdefs::T1_INC);
    // a device never dimmed ignores the continue scene
    let (mut fresh, fresh_applied) = light_device();
    fresh.call_scene(T1234_CONT, false).await;
    assert!(fresh_applied.lock().expect("lock").is_empty());
  }

  #[tokio::test]
  async fn test_save_scene_and_local_priority_gate() {
    let (mut device, _applied) = light_device();
    device.call_scene(T0_S1, false).await;
    device.save_scene(17);
    let table = device.settings.scene_table.as_ref().expect("table");
    assert!(table.has_stored_scene(17));
    assert_eq!(table.get_scene(17).value(0), 100.0);

    // setLocalPriority only sticks for cared-for scenes; scene 41 is a
    // dontCare reserved scene, scene 40 (AUTO_OFF) is a real one
    device.set_local_priority(41);
    assert!(!device.local_priority());
    device.set_local_priority(dsdefs::AUTO_OFF);
    assert!(device.local_priority());
  }

  #[tokio::test]
  async fn test_call_scene_min() {
    let (mut device, applied) = light_device();
    device.output.as_mut().expect("output").min_brightness = 10.0;
    device.call_scene_min(T0_S1).await;
    assert_eq!(applied.lock().expect("lock").as_slice(), &[10.0]);
  }
}
