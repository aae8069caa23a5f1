// vdcd-rs Source Code File - Virtual Device Controller for digitalSTROM.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Scenes and the per-device scene table.
//!
//! The table is sparse: scenes live in memory only when they differ from
//! the built-in defaults (persisted overrides) or were customized by a
//! scene override file. `get_scene` synthesizes a default for anything
//! else. The undo pseudo scene is held by the device and never persisted.

use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::Path;

use rusqlite::types::Value as SqlValue;
use rusqlite::Row;

use vdc_core::dsdefs::{SceneNo, NUM_DEFAULT_SCENES};
use vdc_core::VdcResult;

use crate::persist::{db_err, FieldDef, FieldType, ParamStore, PersistedParams, PARENT_KEY};

/// What a scene call does beyond (or instead of) applying values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SceneCmd {
  /// No command, reserved scene.
  None,
  #[default]
  Invoke,
  Off,
  Min,
  Max,
  Increment,
  Decrement,
  AreaContinue,
  Stop,
  /// Slow motion off (fade down over a minute).
  SlowOff,
}

/// Transition effect of a scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SceneEffect {
  /// No transition, apply instantly.
  None = 0,
  #[default]
  Smooth = 1,
  Slow = 2,
  Flash = 3,
}

impl SceneEffect {
  fn from_i64(v: i64) -> Self {
    match v {
      0 => SceneEffect::None,
      2 => SceneEffect::Slow,
      3 => SceneEffect::Flash,
      _ => SceneEffect::Smooth,
    }
  }
}

// Flags packed into the scene's global flag word.
const FLAG_DONT_CARE: u32 = 0x0001;
const FLAG_IGNORE_LOCAL_PRIORITY: u32 = 0x0002;
/// Per-channel dontCare bits; up to 16 channels fit in the flag word.
const FLAG_VALUE_DONT_CARE_0: u32 = 0x100;
pub const MAX_SCENE_CHANNELS: usize = 16;

/// One row of the built-in default table:
/// (value, effect, ignoreLocalPriority, dontCare, sceneCmd, sceneArea)
type DefaultSceneRow = (f64, SceneEffect, bool, bool, SceneCmd, u8);

use self::SceneCmd as C;
use self::SceneEffect as E;

/// Built-in defaults for scenes 0..79. Values are percent of full scale.
/// Scene numbers at or above NUM_DEFAULT_SCENES use the final catch-all
/// row.
#[rustfmt::skip]
static DEFAULT_SCENES: [DefaultSceneRow; NUM_DEFAULT_SCENES + 1] = [
  // group related scenes
  // (value, effect, ignoreLocalPriority, dontCare, sceneCmd, sceneArea)
  (  0.0, E::Smooth, false, false, C::Off,          0), // 0 : Preset 0 - T0_S0
  (  0.0, E::Smooth, true,  false, C::Off,          1), // 1 : Area 1 Off - T1_S0
  (  0.0, E::Smooth, true,  false, C::Off,          2), // 2 : Area 2 Off - T2_S0
  (  0.0, E::Smooth, true,  false, C::Off,          3), // 3 : Area 3 Off - T3_S0
  (  0.0, E::Smooth, true,  false, C::Off,          4), // 4 : Area 4 Off - T4_S0
  (100.0, E::Smooth, false, false, C::Invoke,       0), // 5 : Preset 1 - T0_S1
  (100.0, E::Smooth, true,  false, C::Invoke,       1), // 6 : Area 1 On - T1_S1
  (100.0, E::Smooth, true,  false, C::Invoke,       2), // 7 : Area 2 On - T2_S1
  (100.0, E::Smooth, true,  false, C::Invoke,       3), // 8 : Area 3 On - T3_S1
  (100.0, E::Smooth, true,  false, C::Invoke,       4), // 9 : Area 4 On - T4_S1
  (  0.0, E::Smooth, true,  false, C::AreaContinue, 0), // 10 : Area Stepping continue - T1234_CONT
  (  0.0, E::Smooth, false, false, C::Decrement,    0), // 11 : Decrement - DEC_S
  (  0.0, E::Smooth, false, false, C::Increment,    0), // 12 : Increment - INC_S
  (  0.0, E::Smooth, true,  false, C::Min,          0), // 13 : Minimum - MIN_S
  (100.0, E::Smooth, true,  false, C::Max,          0), // 14 : Maximum - MAX_S
  (  0.0, E::Smooth, true,  false, C::Stop,         0), // 15 : Stop - STOP_S
  (  0.0, E::Smooth, false, true,  C::None,         0), // 16 : Reserved
  ( 75.0, E::Smooth, false, false, C::Invoke,       0), // 17 : Preset 2 - T0_S2
  ( 50.0, E::Smooth, false, false, C::Invoke,       0), // 18 : Preset 3 - T0_S3
  ( 25.0, E::Smooth, false, false, C::Invoke,       0), // 19 : Preset 4 - T0_S4
  ( 75.0, E::Smooth, false, false, C::Invoke,       0), // 20 : Preset 12 - T1_S2
  ( 50.0, E::Smooth, false, false, C::Invoke,       0), // 21 : Preset 13 - T1_S3
  ( 25.0, E::Smooth, false, false, C::Invoke,       0), // 22 : Preset 14 - T1_S4
  ( 75.0, E::Smooth, false, false, C::Invoke,       0), // 23 : Preset 22 - T2_S2
  ( 65.0, E::Smooth, false, false, C::Invoke,       0), // 24 : Preset 23 - T2_S3
  ( 64.0, E::Smooth, false, false, C::Invoke,       0), // 25 : Preset 24 - T2_S4
  ( 75.0, E::Smooth, false, false, C::Invoke,       0), // 26 : Preset 32 - T3_S2
  ( 65.0, E::Smooth, false, false, C::Invoke,       0), // 27 : Preset 33 - T3_S3
  ( 25.0, E::Smooth, false, false, C::Invoke,       0), // 28 : Preset 34 - T3_S4
  ( 75.0, E::Smooth, false, false, C::Invoke,       0), // 29 : Preset 42 - T4_S2
  ( 65.0, E::Smooth, false, false, C::Invoke,       0), // 30 : Preset 43 - T4_S3
  ( 25.0, E::Smooth, false, false, C::Invoke,       0), // 31 : Preset 44 - T4_S4
  (  0.0, E::Smooth, false, false, C::Off,          0), // 32 : Preset 10 - T1E_S0
  (100.0, E::Smooth, false, false, C::Invoke,       0), // 33 : Preset 11 - T1E_S1
  (  0.0, E::Smooth, false, false, C::Off,          0), // 34 : Preset 20 - T2E_S0
  (100.0, E::Smooth, false, false, C::Invoke,       0), // 35 : Preset 21 - T2E_S1
  (  0.0, E::Smooth, false, false, C::Off,          0), // 36 : Preset 30 - T3E_S0
  (100.0, E::Smooth, false, false, C::Invoke,       0), // 37 : Preset 31 - T3E_S1
  (  0.0, E::Smooth, false, false, C::Off,          0), // 38 : Preset 40 - T4E_S0
  (100.0, E::Smooth, false, false, C::Invoke,       0), // 39 : Preset 41 - T4E_S1
  (  0.0, E::Smooth, false, false, C::SlowOff,      0), // 40 : Fade down to 0 in 1min - AUTO_OFF
  (  0.0, E::Smooth, false, true,  C::None,         0), // 41 : Reserved
  (  0.0, E::Smooth, true,  false, C::Decrement,    1), // 42 : Area 1 Decrement - T1_DEC
  (  0.0, E::Smooth, true,  false, C::Increment,    1), // 43 : Area 1 Increment - T1_INC
  (  0.0, E::Smooth, true,  false, C::Decrement,    2), // 44 : Area 2 Decrement - T2_DEC
  (  0.0, E::Smooth, true,  false, C::Increment,    2), // 45 : Area 2 Increment - T2_INC
  (  0.0, E::Smooth, true,  false, C::Decrement,    3), // 46 : Area 3 Decrement - T3_DEC
  (  0.0, E::Smooth, true,  false, C::Increment,    3), // 47 : Area 3 Increment - T3_INC
  (  0.0, E::Smooth, true,  false, C::Decrement,    4), // 48 : Area 4 Decrement - T4_DEC
  (  0.0, E::Smooth, true,  false, C::Increment,    4), // 49 : Area 4 Increment - T4_INC
  (  0.0, E::Smooth, true,  false, C::Off,          0), // 50 : Device (Local Button) off - LOCAL_OFF
  (100.0, E::Smooth, true,  false, C::Invoke,       0), // 51 : Device (Local Button) on - LOCAL_ON
  (  0.0, E::Smooth, true,  false, C::Stop,         1), // 52 : Area 1 Stop - T1_STOP_S
  (  0.0, E::Smooth, true,  false, C::Stop,         2), // 53 : Area 2 Stop - T2_STOP_S
  (  0.0, E::Smooth, true,  false, C::Stop,         3), // 54 : Area 3 Stop - T3_STOP_S
  (  0.0, E::Smooth, true,  false, C::Stop,         4), // 55 : Area 4 Stop - T4_STOP_S
  (  0.0, E::Smooth, false, true,  C::None,         0), // 56 : Reserved
  (  0.0, E::Smooth, false, true,  C::None,         0), // 57 : Reserved
  (  0.0, E::Smooth, false, true,  C::None,         0), // 58 : Reserved
  (  0.0, E::Smooth, false, true,  C::None,         0), // 59 : Reserved
  (  0.0, E::Smooth, false, true,  C::None,         0), // 60 : Reserved
  (  0.0, E::Smooth, false, true,  C::None,         0), // 61 : Reserved
  (  0.0, E::Smooth, false, true,  C::None,         0), // 62 : Reserved
  (  0.0, E::Smooth, false, true,  C::None,         0), // 63 : Reserved
  // global, apartment-wide, group independent scenes
  (  0.0, E::Slow,   true,  false, C::Invoke,       0), // 64 : Auto Standby - AUTO_STANDBY
  (100.0, E::None,   true,  false, C::Invoke,       0), // 65 : Panic - SIG_PANIC
  (  0.0, E::Smooth, false, true,  C::Invoke,       0), // 66 : Reserved (ENERGY_OL)
  (  0.0, E::Smooth, true,  false, C::Invoke,       0), // 67 : Standby - STANDBY
  (  0.0, E::Smooth, true,  false, C::Invoke,       0), // 68 : Deep Off - DEEP_OFF
  (  0.0, E::Smooth, true,  false, C::Invoke,       0), // 69 : Sleeping - SLEEPING
  (100.0, E::Smooth, true,  true,  C::Invoke,       0), // 70 : Wakeup - WAKE_UP
  (100.0, E::Smooth, true,  true,  C::Invoke,       0), // 71 : Present - PRESENT
  (  0.0, E::Smooth, true,  false, C::Invoke,       0), // 72 : Absent - ABSENT
  (  0.0, E::Smooth, true,  true,  C::Invoke,       0), // 73 : Door Bell - SIG_BELL
  (100.0, E::Smooth, false, true,  C::Invoke,       0), // 74 : Alarm1 - SIG_ALARM
  (100.0, E::Smooth, false, true,  C::Invoke,       0), // 75 : Zone Active
  (100.0, E::None,   true,  false, C::Invoke,       0), // 76 : Fire
  (100.0, E::None,   false, true,  C::Invoke,       0), // 77 : Smoke
  (100.0, E::None,   false, true,  C::Invoke,       0), // 78 : Water
  (100.0, E::None,   false, true,  C::Invoke,       0), // 79 : Gas
  // all other scenes equal or higher
  (  0.0, E::Smooth, false, true,  C::Invoke,       0), // 80..n : Reserved
];

/// One scene: target values plus metadata for one of the 128 dS scene
/// numbers.
#[derive(Debug, Clone)]
pub struct Scene {
  scene_no: SceneNo,
  cmd: SceneCmd,
  area: u8,
  global_flags: u32,
  values: Vec<f64>,
  effect: SceneEffect,
  row_id: i64,
  dirty: bool,
}

impl Scene {
  /// Construct the built-in default scene for a number.
  pub fn default_for(scene_no: SceneNo, num_channels: usize) -> Self {
    let row = DEFAULT_SCENES[(scene_no as usize).min(NUM_DEFAULT_SCENES)];
    let (value, effect, ignore_local_priority, dont_care, cmd, area) = row;
    let mut flags = 0u32;
    if dont_care {
      flags |= FLAG_DONT_CARE;
    }
    if ignore_local_priority {
      flags |= FLAG_IGNORE_LOCAL_PRIORITY;
    }
    Self {
      scene_no,
      cmd,
      area,
      global_flags: flags,
      values: vec![value; num_channels.max(1)],
      effect,
      row_id: 0,
      dirty: false,
    }
  }

  /// Re-apply the number-derived defaults after the scene number became
  /// known during a DB load (cmd and area are not stored).
  fn reinit_for(&mut self, scene_no: SceneNo) {
    let num_channels = self.values.len();
    *self = Scene {
      row_id: self.row_id,
      ..Scene::default_for(scene_no, num_channels)
    };
  }

  pub fn scene_no(&self) -> SceneNo {
    self.scene_no
  }

  /// Retag the scene; used for the undo pseudo scene which remembers the
  /// scene number it captured state for.
  pub fn set_scene_no(&mut self, scene_no: SceneNo) {
    self.scene_no = scene_no;
  }

  pub fn cmd(&self) -> SceneCmd {
    self.cmd
  }

  pub fn area(&self) -> u8 {
    self.area
  }

  pub fn effect(&self) -> SceneEffect {
    self.effect
  }

  pub fn set_effect(&mut self, effect: SceneEffect) {
    if self.effect != effect {
      self.effect = effect;
      self.dirty = true;
    }
  }

  pub fn dont_care(&self) -> bool {
    self.global_flags & FLAG_DONT_CARE != 0
  }

  pub fn set_dont_care(&mut self, dont_care: bool) {
    self.set_flag(FLAG_DONT_CARE, dont_care);
  }

  pub fn ignores_local_priority(&self) -> bool {
    self.global_flags & FLAG_IGNORE_LOCAL_PRIORITY != 0
  }

  pub fn set_ignore_local_priority(&mut self, ignore: bool) {
    self.set_flag(FLAG_IGNORE_LOCAL_PRIORITY, ignore);
  }

  fn set_flag(&mut self, mask: u32, set: bool) {
    let new_flags = if set {
      self.global_flags | mask
    } else {
      self.global_flags & !mask
    };
    if new_flags != self.global_flags {
      self.global_flags = new_flags;
      self.dirty = true;
    }
  }

  pub fn num_values(&self) -> usize {
    self.values.len()
  }

  pub fn value(&self, index: usize) -> f64 {
    self.values.get(index).copied().unwrap_or(0.0)
  }

  pub fn set_value(&mut self, index: usize, value: f64) {
    if let Some(slot) = self.values.get_mut(index) {
      if *slot != value {
        *slot = value;
        self.dirty = true;
      }
    }
  }

  /// Capture a live channel value into the scene (saveScene/undo).
  pub fn record_value(&mut self, index: usize, value: f64) {
    self.set_value(index, value);
  }

  pub fn value_dont_care(&self, index: usize) -> bool {
    if index >= self.values.len() || index >= MAX_SCENE_CHANNELS {
      return true;
    }
    self.global_flags & (FLAG_VALUE_DONT_CARE_0 << index) != 0
  }

  pub fn set_value_dont_care(&mut self, index: usize, dont_care: bool) {
    if index < self.values.len() && index < MAX_SCENE_CHANNELS {
      self.set_flag(FLAG_VALUE_DONT_CARE_0 << index, dont_care);
    }
  }

  pub fn dirty(&self) -> bool {
    self.dirty
  }

  pub fn mark_clean(&mut self) {
    self.dirty = false;
  }

  pub fn mark_dirty(&mut self) {
    self.dirty = true;
  }

  pub fn is_persisted(&self) -> bool {
    self.row_id != 0
  }
}

const SCENE_KEYS: [FieldDef; 2] = [
  PARENT_KEY,
  FieldDef::new("sceneNo", FieldType::Integer),
];

const SCENE_FIELDS: [FieldDef; 3] = [
  FieldDef::new("commonFlags", FieldType::Integer),
  FieldDef::new("brightness", FieldType::Float),
  FieldDef::new("effect", FieldType::Integer),
];

impl PersistedParams for Scene {
  fn table_name(&self) -> &'static str {
    "LightScenes"
  }

  fn key_defs(&self) -> &'static [FieldDef] {
    &SCENE_KEYS
  }

  fn field_defs(&self) -> &'static [FieldDef] {
    &SCENE_FIELDS
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
    let scene_no: i64 = row.get(*index).map_err(db_err)?;
    *index += 1;
    // fields not stored (cmd, area) must regain their number-derived
    // defaults now that the scene number is known
    self.reinit_for(scene_no as SceneNo);
    let flags: i64 = row.get(*index).map_err(db_err)?;
    *index += 1;
    let brightness: f64 = row.get(*index).map_err(db_err)?;
    *index += 1;
    let effect: i64 = row.get(*index).map_err(db_err)?;
    *index += 1;
    self.global_flags = flags as u32;
    for slot in self.values.iter_mut() {
      *slot = brightness;
    }
    self.effect = SceneEffect::from_i64(effect);
    Ok(())
  }

  fn extra_key_values(&self) -> Vec<SqlValue> {
    vec![SqlValue::Integer(self.scene_no as i64)]
  }

  fn field_values(&self) -> Vec<SqlValue> {
    vec![
      SqlValue::Integer(self.global_flags as i64),
      SqlValue::Real(self.value(0)),
      SqlValue::Integer(self.effect as i64),
    ]
  }
}

/// The sparse per-device scene table.
#[derive(Debug, Clone)]
pub struct SceneTable {
  num_channels: usize,
  scenes: BTreeMap<SceneNo, Scene>,
}

impl SceneTable {
  pub fn new(num_channels: usize) -> Self {
    Self {
      num_channels,
      scenes: BTreeMap::new(),
    }
  }

  pub fn num_channels(&self) -> usize {
    self.num_channels
  }

  /// A fresh default scene, not entered into the table.
  pub fn new_default_scene(&self, scene_no: SceneNo) -> Scene {
    Scene::default_for(scene_no, self.num_channels)
  }

  /// The stored scene if present, else a fresh default.
  pub fn get_scene(&self, scene_no: SceneNo) -> Scene {
    self
      .scenes
      .get(&scene_no)
      .cloned()
      .unwrap_or_else(|| self.new_default_scene(scene_no))
  }

  pub fn has_stored_scene(&self, scene_no: SceneNo) -> bool {
    self.scenes.contains_key(&scene_no)
  }

  /// Promote a scene to the stored (non-default) set and mark it dirty.
  /// Returns true when the owning device settings row must be marked
  /// dirty too, so the table gains a rowid for its children.
  pub fn update_scene(&mut self, mut scene: Scene) -> bool {
    scene.mark_dirty();
    self.scenes.insert(scene.scene_no(), scene);
    true
  }

  /// Drop a stored scene, reverting to the default. The removed scene is
  /// returned so the caller can delete its DB row.
  pub fn reset_scene(&mut self, scene_no: SceneNo) -> Option<Scene> {
    self.scenes.remove(&scene_no)
  }

  /// Load all persisted scenes of the settings row `parent_rowid`.
  pub fn load_scenes(&mut self, store: &ParamStore, parent_rowid: i64) -> VdcResult<()> {
    let template = self.new_default_scene(0);
    store.ensure_table(template.table_name(), template.key_defs(), template.field_defs())?;
    let sql = template.select_sql();
    let mut stmt = store.connection().prepare(&sql).map_err(db_err)?;
    let mut rows = stmt.query([parent_rowid.to_string()]).map_err(db_err)?;
    while let Some(row) = rows.next().map_err(db_err)? {
      let mut scene = self.new_default_scene(0);
      let row_id: i64 = row.get(0).map_err(db_err)?;
      scene.set_row_id(row_id);
      let mut index = 1;
      scene.load_from_row(row, &mut index)?;
      scene.mark_clean();
      self.scenes.insert(scene.scene_no(), scene);
    }
    Ok(())
  }

  /// Save all dirty stored scenes under the settings row `parent_rowid`.
  pub fn save_scenes(&mut self, store: &ParamStore, parent_rowid: i64) -> VdcResult<()> {
    if parent_rowid == 0 {
      // cannot save children before the parent has a rowid
      return Ok(());
    }
    let parent = parent_rowid.to_string();
    for scene in self.scenes.values_mut() {
      scene.save_to_store(store, &parent)?;
    }
    Ok(())
  }

  pub fn delete_scenes(&mut self, store: &ParamStore) -> VdcResult<()> {
    for scene in self.scenes.values_mut() {
      scene.delete_from_store(store)?;
    }
    self.scenes.clear();
    Ok(())
  }

  /// Apply scene override files. Level ids are ordered most specific
  /// first; a less specific level only applies to a scene already
  /// customized by a more specific one when the line carries the `!`
  /// override prefix. File-based values are never written back to the DB.
  pub fn load_scenes_from_files(&mut self, dir: &Path, level_ids: &[String]) {
    for level in level_ids {
      let path = dir.join(format!("scenes_{level}.csv"));
      let file = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
        Err(e) => {
          error!("failed opening {}: {}", path.display(), e);
          continue;
        }
      };
      let reader = std::io::BufReader::new(file);
      for (line_no, line) in reader.lines().enumerate() {
        let line = match line {
          Ok(l) => l,
          Err(_) => break,
        };
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
          continue;
        }
        if self.apply_csv_line(trimmed).is_none() {
          warn!("{}:{}: invalid scene override line", path.display(), line_no + 1);
        }
      }
    }
  }

  fn apply_csv_line(&mut self, line: &str) -> Option<()> {
    let mut fields = line.split(',');
    let mut no_field = fields.next()?.trim();
    let overridden = if let Some(rest) = no_field.strip_prefix('!') {
      no_field = rest;
      true
    } else {
      false
    };
    let scene_no: SceneNo = no_field.parse().ok()?;
    let mut scene = match self.scenes.get(&scene_no) {
      Some(existing) => {
        if !overridden {
          // already configured by a more specific level
          return Some(());
        }
        existing.clone()
      }
      None => self.new_default_scene(scene_no),
    };
    for assignment in fields {
      let (name, value) = assignment.split_once('=')?;
      let name = name.trim();
      let value = value.trim();
      match name {
        "value" => scene.set_value(0, value.parse().ok()?),
        "dontCare" => scene.set_dont_care(parse_bool(value)?),
        "ignoreLocalPriority" => scene.set_ignore_local_priority(parse_bool(value)?),
        "effect" => {
          scene.set_effect(match value {
            "none" => SceneEffect::None,
            "smooth" => SceneEffect::Smooth,
            "slow" => SceneEffect::Slow,
            "flash" => SceneEffect::Flash,
            _ => return None,
          });
        }
        _ => {
          if let Some(idx_str) = name.strip_prefix("value") {
            let idx: usize = idx_str.parse().ok()?;
            scene.set_value(idx, value.parse().ok()?);
          } else {
            return None;
          }
        }
      }
    }
    // file-based customization is never written back to the DB
    scene.mark_clean();
    self.scenes.insert(scene_no, scene);
    Some(())
  }
}

fn parse_bool(s: &str) -> Option<bool> {
  match s {
    "1" | "true" | "yes" => Some(true),
    "0" | "false" | "no" => Some(false),
    _ => None,
  }
}

/// Per-device settings row, owning the optional scene table as its child
/// collection.
#[derive(Debug, Clone)]
pub struct DeviceSettings {
  row_id: i64,
  dirty: bool,
  pub device_flags: u64,
  pub name: String,
  pub zone_id: i64,
  pub scene_table: Option<SceneTable>,
}

impl DeviceSettings {
  pub fn new(scene_table: Option<SceneTable>) -> Self {
    Self {
      row_id: 0,
      dirty: false,
      device_flags: 0,
      name: String::new(),
      zone_id: 0,
      scene_table,
    }
  }
}

const DEVICE_SETTINGS_FIELDS: [FieldDef; 3] = [
  FieldDef::new("deviceFlags", FieldType::Integer),
  FieldDef::new("deviceName", FieldType::Text),
  FieldDef::new("zoneID", FieldType::Integer),
];

impl PersistedParams for DeviceSettings {
  fn table_name(&self) -> &'static str {
    "DeviceSettings"
  }

  fn field_defs(&self) -> &'static [FieldDef] {
    &DEVICE_SETTINGS_FIELDS
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
    let flags: i64 = row.get(*index).map_err(db_err)?;
    *index += 1;
    self.name = row.get(*index).map_err(db_err)?;
    *index += 1;
    self.zone_id = row.get(*index).map_err(db_err)?;
    *index += 1;
    self.device_flags = flags as u64;
    Ok(())
  }

  fn field_values(&self) -> Vec<SqlValue> {
    vec![
      SqlValue::Integer(self.device_flags as i64),
      SqlValue::Text(self.name.clone()),
      SqlValue::Integer(self.zone_id),
    ]
  }

  fn load_children(&mut self, store: &ParamStore) -> VdcResult<()> {
    let row_id = self.row_id;
    if let Some(table) = self.scene_table.as_mut() {
      if row_id != 0 {
        table.load_scenes(store, row_id)?;
      }
    }
    Ok(())
  }

  fn save_children(&mut self, store: &ParamStore) -> VdcResult<()> {
    let row_id = self.row_id;
    if let Some(table) = self.scene_table.as_mut() {
      table.save_scenes(store, row_id)?;
    }
    Ok(())
  }

  fn delete_children(&mut self, store: &ParamStore) -> VdcResult<()> {
    if let Some(table) = self.scene_table.as_mut() {
      table.delete_scenes(store)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use vdc_core::dsdefs::{AUTO_OFF, SIG_PANIC, T0_S1, T1E_S0, T1_S1, T1234_CONT, T2_INC};

  #[test]
  fn test_default_table_spot_checks() {
    let table = SceneTable::new(1);
    // Preset 1 (main on): full value, normal priority, cared-for
    let s5 = table.get_scene(T0_S1);
    assert_eq!(s5.value(0), 100.0);
    assert!(!s5.dont_care());
    assert!(!s5.ignores_local_priority());
    assert_eq!(s5.cmd(), SceneCmd::Invoke);
    assert_eq!(s5.area(), 0);
    // Area 1 On: ignores local priority, area 1
    let s6 = table.get_scene(T1_S1);
    assert!(s6.ignores_local_priority());
    assert_eq!(s6.area(), 1);
    // Panic: apartment scene, full on, instant
    let s65 = table.get_scene(SIG_PANIC);
    assert_eq!(s65.value(0), 100.0);
    assert!(s65.ignores_local_priority());
    assert_eq!(s65.effect(), SceneEffect::None);
    // Preset 10 is an off command, not an area scene
    let s32 = table.get_scene(T1E_S0);
    assert_eq!(s32.cmd(), SceneCmd::Off);
    assert_eq!(s32.area(), 0);
    assert!(!s32.dont_care());
    // AUTO_OFF is a real slow-off scene, not a reserved one
    let s40 = table.get_scene(AUTO_OFF);
    assert_eq!(s40.cmd(), SceneCmd::SlowOff);
    assert!(!s40.dont_care());
    assert_eq!(s40.value(0), 0.0);
    // reserved scenes carry no command at all
    let s41 = table.get_scene(41);
    assert!(s41.dont_care());
    assert_eq!(s41.cmd(), SceneCmd::None);
    // Area continue pseudo scene; area dim scenes carry their area
    assert_eq!(table.get_scene(T1234_CONT).cmd(), SceneCmd::AreaContinue);
    let s45 = table.get_scene(T2_INC);
    assert_eq!(s45.cmd(), SceneCmd::Increment);
    assert_eq!(s45.area(), 2);
    // Auto Standby keeps its slow transition
    assert_eq!(table.get_scene(vdc_core::dsdefs::AUTO_STANDBY).effect(), SceneEffect::Slow);
    // scenes above 79 default to dontCare
    let s100 = table.get_scene(100);
    assert!(s100.dont_care());
    assert_eq!(s100.value(0), 0.0);
  }

  #[test]
  fn test_value_dont_care_packing() {
    let mut scene = Scene::default_for(5, 3);
    assert!(!scene.value_dont_care(0));
    scene.set_value_dont_care(1, true);
    assert!(!scene.value_dont_care(0));
    assert!(scene.value_dont_care(1));
    assert!(scene.dirty());
    // out-of-range channels are always dontCare
    assert!(scene.value_dont_care(7));
    scene.set_value_dont_care(1, false);
    assert!(!scene.value_dont_care(1));
  }

  #[test]
  fn test_sparse_promotion() {
    let mut table = SceneTable::new(1);
    assert!(!table.has_stored_scene(5));
    let mut scene = table.get_scene(5);
    scene.set_value(0, 42.0);
    table.update_scene(scene);
    assert!(table.has_stored_scene(5));
    assert_eq!(table.get_scene(5).value(0), 42.0);
    table.reset_scene(5);
    assert_eq!(table.get_scene(5).value(0), 100.0); // back to default
  }

  #[test]
  fn test_scene_persistence_round_trip() {
    let store = ParamStore::open_in_memory().expect("store opens");
    let mut table = SceneTable::new(1);
    let mut scene = table.get_scene(17);
    scene.set_value(0, 42.0);
    scene.set_ignore_local_priority(true);
    table.update_scene(scene);
    table.save_scenes(&store, 7).expect("saves");

    let mut reloaded = SceneTable::new(1);
    reloaded.load_scenes(&store, 7).expect("loads");
    let scene = reloaded.get_scene(17);
    assert_eq!(scene.value(0), 42.0);
    assert!(scene.ignores_local_priority());
    assert!(!scene.dirty());
    // cmd/area were reconstructed from the scene number
    assert_eq!(scene.cmd(), SceneCmd::Invoke);
    // untouched scenes are still defaults
    assert!(!reloaded.has_stored_scene(18));
  }

  #[test]
  fn test_default_flags_round_trip() {
    // spec property: default-table-defined flags survive save -> load
    let store = ParamStore::open_in_memory().expect("store opens");
    let mut table = SceneTable::new(1);
    for no in [0u8, 6, 13, 64, 65] {
      let scene = table.get_scene(no);
      let (ilp, dc, cmd, area) = (scene.ignores_local_priority(), scene.dont_care(), scene.cmd(), scene.area());
      table.update_scene(scene);
      table.save_scenes(&store, 3).expect("saves");
      let mut reloaded = SceneTable::new(1);
      reloaded.load_scenes(&store, 3).expect("loads");
      let back = reloaded.get_scene(no);
      assert_eq!(back.ignores_local_priority(), ilp, "scene {no}");
      assert_eq!(back.dont_care(), dc, "scene {no}");
      assert_eq!(back.cmd(), cmd, "scene {no}");
      assert_eq!(back.area(), area, "scene {no}");
    }
  }

  #[test]
  fn test_csv_overlay_levels() {
    let dir = tempfile::tempdir().expect("tempdir");
    // most specific level customizes scene 5; less specific level only
    // gets through with the override prefix
    std::fs::write(
      dir.path().join("scenes_vdsd_X.csv"),
      "# device specific\n5,value=10\n",
    )
    .expect("writes");
    std::fs::write(
      dir.path().join("scenes_class_Y.csv"),
      "5,value=20\n!6,value=30,dontCare=1\n",
    )
    .expect("writes");
    let mut table = SceneTable::new(1);
    table.load_scenes_from_files(
      dir.path(),
      &["vdsd_X".to_owned(), "class_Y".to_owned()],
    );
    assert_eq!(table.get_scene(5).value(0), 10.0); // specific wins
    assert_eq!(table.get_scene(6).value(0), 30.0); // override applied
    assert!(table.get_scene(6).dont_care());
    // file-based values are clean (never persisted)
    assert!(!table.get_scene(5).dirty());
  }

  #[test]
  fn test_device_settings_with_scene_children() {
    let store = ParamStore::open_in_memory().expect("store opens");
    let mut settings = DeviceSettings::new(Some(SceneTable::new(1)));
    settings.name = "Lamp".into();
    settings.zone_id = 4;
    let mut scene = settings.scene_table.as_ref().expect("table").get_scene(5);
    scene.set_value(0, 77.0);
    settings.scene_table.as_mut().expect("table").update_scene(scene);
    settings.mark_dirty(); // scene table needs the parent rowid
    settings.save_to_store(&store, "DEV1").expect("saves");
    assert_ne!(settings.row_id(), 0);

    let mut reloaded = DeviceSettings::new(Some(SceneTable::new(1)));
    assert!(reloaded.load_from_store(&store, "DEV1").expect("loads"));
    assert_eq!(reloaded.name, "Lamp");
    assert_eq!(reloaded.zone_id, 4);
    assert_eq!(
      reloaded.scene_table.as_ref().expect("table").get_scene(5).value(0),
      77.0
    );
  }
}
