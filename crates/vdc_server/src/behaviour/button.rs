// vdcd-rs Source Code File - Virtual Device Controller for digitalSTROM.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Button behaviour: the state machine turning raw press/release edges
//! into dS click types, plus the persisted button settings.
//!
//! The machine is a pure function of (edge, timestamp) sequences; given
//! identical input at identical timing it emits identical click
//! sequences. Timestamps are the host's monotonic milliseconds. A
//! timestamp of 0 doubles as "no timer" - production clocks never hand
//! out 0, test timelines that start at 0 inherit the reference timing.

use rusqlite::types::Value as SqlValue;
use rusqlite::Row;
use serde_json::Value;

use vdc_core::dsdefs::{DsButtonElement, DsButtonFunc, DsButtonMode, DsButtonType, DsClickType, DsGroup};
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

// State machine timing, all in milliseconds.
const T_CLICK_LENGTH: i64 = 140;
const T_CLICK_PAUSE: i64 = 140;
const T_TIP_TIMEOUT: i64 = 800;
const T_LONG_FUNCTION_DELAY: i64 = 500;
const T_DIM_REPEAT_TIME: i64 = 1000;
const T_LOCAL_DIM_TIMEOUT: i64 = 160;
const MAX_HOLD_REPEATS: u32 = 30;

/// Cadence at which the machine re-examines its timers while armed.
pub const BUTTON_TICK_INTERVAL_MS: u64 = 10;

/// "no timer armed" sentinel.
const NEVER: u64 = 0;

/// Key identifier reported with a click, distinguishing the two sides of
/// a rocker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyId {
  OneWay,
  TwoWayA,
  TwoWayB,
}

impl KeyId {
  pub fn as_u8(&self) -> u8 {
    match self {
      KeyId::OneWay => 0,
      KeyId::TwoWayA => 1,
      KeyId::TwoWayB => 2,
    }
  }
}

/// Emissions of the button state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
  /// A dS click type to report upstream.
  Click(DsClickType),
  /// The local button toggled the device output (true = on).
  LocalSwitch(bool),
  /// One local dimming step (true = up).
  LocalDim(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
  S0Idle,
  S1InitialPress,
  S2HoldOrTip,
  S3Hold,
  S4NextTipWait,
  S5NextPauseWait,
  S6TwoClickWait,
  S7ProgModeWait,
  S8AwaitRelease,
  S9TwoPauseWait,
  S11LocalDim,
  S12ThreeClickWait,
  S13ThreePauseWait,
  S14AwaitRelease,
}

/// The 15-state button machine.
#[derive(Debug, Clone)]
pub struct ButtonStateMachine {
  state: State,
  button_pressed: bool,
  second_key: bool,
  click_counter: u32,
  hold_repeats: u32,
  output_on: bool,
  local_button_enabled: bool,
  /// Rocker: local switching selects on/off by side instead of toggling.
  two_way: bool,
  dimming_up: bool,
  timer_ref: u64,
}

impl Default for ButtonStateMachine {
  fn default() -> Self {
    Self::new()
  }
}

impl ButtonStateMachine {
  pub fn new() -> Self {
    let mut machine = Self {
      state: State::S0Idle,
      button_pressed: false,
      second_key: false,
      click_counter: 0,
      hold_repeats: 0,
      output_on: false,
      local_button_enabled: false,
      two_way: false,
      dimming_up: false,
      timer_ref: NEVER,
    };
    machine.reset();
    machine
  }

  pub fn reset(&mut self) {
    self.button_pressed = false;
    self.state = State::S0Idle;
    self.click_counter = 0;
    self.hold_repeats = 0;
    self.output_on = false;
    self.dimming_up = false;
    self.timer_ref = NEVER;
  }

  /// Enable local button handling (press toggles/dims the own output
  /// instead of reporting clicks).
  pub fn set_local_button_enabled(&mut self, enabled: bool) {
    self.local_button_enabled = enabled;
  }

  /// Tell the machine whether the device output is currently on; decides
  /// between hold and local dimming on a long press.
  pub fn set_output_on(&mut self, on: bool) {
    self.output_on = on;
  }

  /// Rocker mode: local switching selects on/off by which side was
  /// clicked instead of toggling.
  pub fn set_two_way(&mut self, two_way: bool) {
    self.two_way = two_way;
  }

  pub fn is_idle(&self) -> bool {
    self.state == State::S0Idle
  }

  pub fn is_pressed(&self) -> bool {
    self.button_pressed
  }

  pub fn second_key(&self) -> bool {
    self.second_key
  }

  /// While armed, the driver must call [Self::timer_tick] every
  /// [BUTTON_TICK_INTERVAL_MS].
  pub fn wants_timer(&self) -> bool {
    self.timer_ref != NEVER
  }

  /// Feed a press/release edge. Pressing the opposite key of a rocker
  /// while a run is in progress aborts the current operation and begins
  /// a new run.
  pub fn button_action(
    &mut self,
    pressed: bool,
    second_key: bool,
    now_ms: u64,
    events: &mut Vec<ButtonEvent>,
  ) {
    debug!("button was {}", if pressed { "pressed" } else { "released" });
    self.button_pressed = pressed;
    if self.state != State::S0Idle && self.second_key != second_key {
      self.reset();
      self.button_pressed = pressed;
    }
    self.second_key = second_key;
    self.check_state_machine(true, now_ms, events);
  }

  /// Timer tick while the machine is armed.
  pub fn timer_tick(&mut self, now_ms: u64, events: &mut Vec<ButtonEvent>) {
    self.check_state_machine(false, now_ms, events);
  }

  fn local_switch_output(&mut self, two_way: bool, events: &mut Vec<ButtonEvent>) {
    if two_way {
      // on or off depending on which side of the rocker was clicked
      self.output_on = self.second_key;
    } else {
      self.output_on = !self.output_on;
    }
    events.push(ButtonEvent::LocalSwitch(self.output_on));
    events.push(ButtonEvent::Click(if self.output_on {
      DsClickType::LocalOn
    } else {
      DsClickType::LocalOff
    }));
  }

  fn check_state_machine(&mut self, button_change: bool, now_ms: u64, events: &mut Vec<ButtonEvent>) {
    let time_since_ref = now_ms as i64 - self.timer_ref as i64;
    let pressed = self.button_pressed;
    let two_way = self.two_way;
    match self.state {
      State::S0Idle => {
        self.timer_ref = NEVER;
        if button_change && pressed {
          self.click_counter = if self.local_button_enabled { 0 } else { 1 };
          self.timer_ref = now_ms;
          self.state = State::S1InitialPress;
        }
      }
      State::S1InitialPress => {
        if button_change && !pressed {
          self.timer_ref = now_ms;
          self.state = State::S5NextPauseWait;
        } else if time_since_ref >= T_CLICK_LENGTH {
          self.state = State::S2HoldOrTip;
        }
      }
      State::S2HoldOrTip => {
        if button_change && !pressed && self.click_counter == 0 {
          self.local_switch_output(two_way, events);
          self.timer_ref = now_ms;
          self.click_counter = 1;
          self.state = State::S4NextTipWait;
        } else if button_change && !pressed && self.click_counter > 0 {
          events.push(ButtonEvent::Click(tip_for_count(self.click_counter)));
          self.timer_ref = now_ms;
          self.state = State::S4NextTipWait;
        } else if time_since_ref >= T_LONG_FUNCTION_DELAY {
          if !self.local_button_enabled || !self.output_on {
            self.hold_repeats = 0;
            self.timer_ref = now_ms;
            events.push(ButtonEvent::Click(DsClickType::HoldStart));
            self.state = State::S3Hold;
          } else {
            // local dimming, reversing direction on every new entry
            self.dimming_up = !self.dimming_up;
            self.timer_ref = now_ms.wrapping_add(T_LOCAL_DIM_TIMEOUT as u64);
            self.state = State::S11LocalDim;
          }
        }
      }
      State::S3Hold => {
        if button_change && !pressed {
          events.push(ButtonEvent::Click(DsClickType::HoldEnd));
          self.state = State::S0Idle;
        } else if time_since_ref >= T_DIM_REPEAT_TIME {
          if self.hold_repeats < MAX_HOLD_REPEATS {
            self.timer_ref = now_ms;
            events.push(ButtonEvent::Click(DsClickType::HoldRepeat));
            self.hold_repeats += 1;
          } else {
            events.push(ButtonEvent::Click(DsClickType::HoldEnd));
            self.state = State::S14AwaitRelease;
          }
        }
      }
      State::S4NextTipWait => {
        if button_change && pressed {
          self.timer_ref = now_ms;
          if self.click_counter >= 4 {
            self.click_counter = 2;
          } else {
            self.click_counter += 1;
          }
          self.state = State::S2HoldOrTip;
        } else if time_since_ref >= T_TIP_TIMEOUT {
          self.state = State::S0Idle;
        }
      }
      State::S5NextPauseWait => {
        if button_change && pressed {
          self.timer_ref = now_ms;
          self.click_counter = 2;
          self.state = State::S6TwoClickWait;
        } else if time_since_ref >= T_CLICK_PAUSE {
          if self.local_button_enabled {
            self.local_switch_output(two_way, events);
          } else {
            events.push(ButtonEvent::Click(DsClickType::Click1x));
          }
          self.state = State::S4NextTipWait;
        }
      }
      State::S6TwoClickWait => {
        if button_change && !pressed {
          self.timer_ref = now_ms;
          self.state = State::S9TwoPauseWait;
        } else if time_since_ref > T_CLICK_LENGTH {
          self.state = State::S7ProgModeWait;
        }
      }
      State::S7ProgModeWait => {
        if button_change && !pressed {
          events.push(ButtonEvent::Click(DsClickType::Tip2x));
          self.timer_ref = now_ms;
          self.state = State::S4NextTipWait;
        } else if time_since_ref > T_LONG_FUNCTION_DELAY {
          events.push(ButtonEvent::Click(DsClickType::ShortLong));
          self.state = State::S8AwaitRelease;
        }
      }
      State::S9TwoPauseWait => {
        if button_change && pressed {
          self.timer_ref = now_ms;
          self.click_counter = 3;
          self.state = State::S12ThreeClickWait;
        } else if time_since_ref >= T_CLICK_PAUSE {
          events.push(ButtonEvent::Click(DsClickType::Click2x));
          self.state = State::S4NextTipWait;
        }
      }
      State::S12ThreeClickWait => {
        if button_change && !pressed {
          self.timer_ref = now_ms;
          events.push(ButtonEvent::Click(DsClickType::Click3x));
          self.state = State::S4NextTipWait;
        } else if time_since_ref >= T_CLICK_LENGTH {
          self.state = State::S13ThreePauseWait;
        }
      }
      State::S13ThreePauseWait => {
        // Note: a release here emits tip_3x and re-arms without leaving
        // the state, so repeated press/release pairs keep emitting tip_3x
        // until the long function delay elapses.
        if button_change && !pressed {
          self.timer_ref = now_ms;
          events.push(ButtonEvent::Click(DsClickType::Tip3x));
        } else if time_since_ref >= T_LONG_FUNCTION_DELAY {
          events.push(ButtonEvent::Click(DsClickType::ShortShortLong));
          self.state = State::S8AwaitRelease;
        }
      }
      State::S11LocalDim => {
        if button_change && !pressed {
          self.state = State::S0Idle;
        } else if time_since_ref >= T_DIM_REPEAT_TIME {
          events.push(ButtonEvent::LocalDim(self.dimming_up));
          self.timer_ref = now_ms;
        }
      }
      State::S8AwaitRelease | State::S14AwaitRelease => {
        if button_change && !pressed {
          self.state = State::S0Idle;
        }
      }
    }
  }
}

fn tip_for_count(count: u32) -> DsClickType {
  match count {
    0 | 1 => DsClickType::Tip1x,
    2 => DsClickType::Tip2x,
    3 => DsClickType::Tip3x,
    _ => DsClickType::Tip4x,
  }
}

/// Persisted button settings (LTMODE / LTNUMGRP0 equivalents).
#[derive(Debug, Clone)]
pub struct ButtonSettings {
  row_id: i64,
  dirty: bool,
  pub mode: DsButtonMode,
  pub group: DsGroup,
  pub function: DsButtonFunc,
}

impl Default for ButtonSettings {
  fn default() -> Self {
    Self {
      row_id: 0,
      dirty: false,
      mode: DsButtonMode::Inactive,
      group: DsGroup::YellowLight,
      function: DsButtonFunc::RoomPreset0x,
    }
  }
}

const BUTTON_SETTINGS_FIELDS: [FieldDef; 3] = [
  FieldDef::new("buttonMode", FieldType::Integer),
  FieldDef::new("buttonGroup", FieldType::Integer),
  FieldDef::new("buttonFunction", FieldType::Integer),
];

impl PersistedParams for ButtonSettings {
  fn table_name(&self) -> &'static str {
    "buttonSettings"
  }

  fn field_defs(&self) -> &'static [FieldDef] {
    &BUTTON_SETTINGS_FIELDS
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
    let group: i64 = row.get(*index).map_err(db_err)?;
    *index += 1;
    let function: i64 = row.get(*index).map_err(db_err)?;
    *index += 1;
    self.mode = serde_json::from_value(Value::from(mode)).unwrap_or(DsButtonMode::Inactive);
    self.group = serde_json::from_value(Value::from(group)).unwrap_or(DsGroup::YellowLight);
    self.function = serde_json::from_value(Value::from(function)).unwrap_or(DsButtonFunc::RoomPreset0x);
    Ok(())
  }

  fn field_values(&self) -> Vec<SqlValue> {
    vec![
      SqlValue::Integer(self.mode as i64),
      SqlValue::Integer(self.group as i64),
      SqlValue::Integer(self.function as i64),
    ]
  }
}

/// The button behaviour: hardware facts, persisted settings and the
/// state machine instance.
#[derive(Debug, Clone)]
pub struct ButtonBehaviour {
  pub base: BehaviourBase,
  pub settings: ButtonSettings,
  pub button_type: DsButtonType,
  pub element: DsButtonElement,
  pub supports_local_key: bool,
  pub machine: ButtonStateMachine,
  /// Last click reported, for the state property group.
  pub last_click: DsClickType,
}

impl ButtonBehaviour {
  pub fn new(index: usize, hardware_name: &str, group: DsGroup) -> Self {
    Self {
      base: BehaviourBase::new(index, hardware_name, group),
      settings: ButtonSettings {
        group,
        ..Default::default()
      },
      button_type: DsButtonType::Undefined,
      element: DsButtonElement::Center,
      supports_local_key: false,
      machine: ButtonStateMachine::new(),
      last_click: DsClickType::None,
    }
  }

  /// Configure the hardware shape and pick a matching default mode.
  pub fn set_hardware_config(
    &mut self,
    button_type: DsButtonType,
    element: DsButtonElement,
    supports_local_key: bool,
  ) {
    self.button_type = button_type;
    self.element = element;
    self.supports_local_key = supports_local_key;
    self.settings.mode = match button_type {
      DsButtonType::TwoWay => DsButtonMode::RockerUpDown,
      DsButtonType::Undefined => DsButtonMode::Inactive,
      _ => DsButtonMode::Standard,
    };
    self.machine.set_two_way(self.settings.mode.is_two_way());
    self.settings.mark_dirty();
  }

  /// The key id reported with clicks of this button.
  pub fn key_id(&self) -> KeyId {
    if self.settings.mode.is_two_way() {
      if self.machine.second_key() {
        KeyId::TwoWayB
      } else {
        KeyId::TwoWayA
      }
    } else {
      KeyId::OneWay
    }
  }

  /// Feed a hardware edge into the machine.
  pub fn button_action(&mut self, pressed: bool, second_key: bool, now_ms: u64) -> Vec<ButtonEvent> {
    let mut events = Vec::new();
    self.machine.button_action(pressed, second_key, now_ms, &mut events);
    self.note_clicks(&events);
    events
  }

  pub fn timer_tick(&mut self, now_ms: u64) -> Vec<ButtonEvent> {
    let mut events = Vec::new();
    self.machine.timer_tick(now_ms, &mut events);
    self.note_clicks(&events);
    events
  }

  fn note_clicks(&mut self, events: &[ButtonEvent]) {
    if let Some(ButtonEvent::Click(ct)) = events
      .iter()
      .rev()
      .find(|e| matches!(e, ButtonEvent::Click(_)))
    {
      self.last_click = *ct;
    }
  }
}

// Property tree of one button behaviour.
const BUTTON_PROPS: [PropertyDescriptor; 8] = [
  PropertyDescriptor::field("name", PropertyType::String_, DESCRIPTION_KEY_OFFSET),
  PropertyDescriptor::field("type", PropertyType::String_, DESCRIPTION_KEY_OFFSET + 1),
  PropertyDescriptor::field("buttonType", PropertyType::Int8, DESCRIPTION_KEY_OFFSET + 2),
  PropertyDescriptor::field("buttonElementID", PropertyType::Int8, DESCRIPTION_KEY_OFFSET + 3),
  PropertyDescriptor::field("supportsLocalKeyMode", PropertyType::Bool, DESCRIPTION_KEY_OFFSET + 4),
  PropertyDescriptor::field("mode", PropertyType::Int8, SETTINGS_KEY_OFFSET),
  PropertyDescriptor::field("function", PropertyType::Int8, SETTINGS_KEY_OFFSET + 1),
  PropertyDescriptor::field("clickType", PropertyType::Int8, STATE_KEY_OFFSET),
];

impl PropertyContainer for ButtonBehaviour {
  fn descriptors(&self) -> &'static [PropertyDescriptor] {
    &BUTTON_PROPS
  }

  fn read_field(&self, desc: &PropertyDescriptor, _index: usize) -> VdcResult<Value> {
    Ok(match desc.access_key {
      k if k == DESCRIPTION_KEY_OFFSET => Value::from(self.base.hardware_name.clone()),
      k if k == DESCRIPTION_KEY_OFFSET + 1 => Value::from(BehaviourKind::Button.type_name()),
      k if k == DESCRIPTION_KEY_OFFSET + 2 => Value::from(self.button_type as u8),
      k if k == DESCRIPTION_KEY_OFFSET + 3 => Value::from(self.element as u8),
      k if k == DESCRIPTION_KEY_OFFSET + 4 => Value::from(self.supports_local_key),
      k if k == SETTINGS_KEY_OFFSET => Value::from(self.settings.mode as u8),
      k if k == SETTINGS_KEY_OFFSET + 1 => Value::from(self.settings.function as u8),
      _ => Value::from(self.last_click as u8),
    })
  }

  fn write_field(&mut self, desc: &PropertyDescriptor, _index: usize, value: &Value) -> VdcResult<()> {
    use vdc_core::errors::VdcPropertyError;
    match desc.access_key {
      k if k == SETTINGS_KEY_OFFSET => {
        self.settings.mode =
          serde_json::from_value(value.clone()).map_err(|_| VdcPropertyError::TypeMismatch("mode".into()))?;
        self.settings.mark_dirty();
        Ok(())
      }
      k if k == SETTINGS_KEY_OFFSET + 1 => {
        self.settings.function = serde_json::from_value(value.clone())
          .map_err(|_| VdcPropertyError::TypeMismatch("function".into()))?;
        self.settings.mark_dirty();
        Ok(())
      }
      _ => Err(VdcPropertyError::ReadOnly(desc.name.to_owned()).into()),
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;

  fn clicks(events: &[ButtonEvent]) -> Vec<DsClickType> {
    events
      .iter()
      .filter_map(|e| match e {
        ButtonEvent::Click(ct) => Some(*ct),
        _ => None,
      })
      .collect()
  }

  /// Drive the machine over a timeline of edges, ticking every 10 ms
  /// while armed. Edges at a given time are processed before the tick of
  /// the same instant, matching the main loop's event ordering.
  fn run_timeline(machine: &mut ButtonStateMachine, edges: &[(u64, bool)], until: u64) -> Vec<(u64, ButtonEvent)> {
    let mut out = Vec::new();
    let mut edge_iter = edges.iter().peekable();
    for now in 0..=until {
      let mut events = Vec::new();
      while let Some((t, pressed)) = edge_iter.peek() {
        if *t == now {
          machine.button_action(*pressed, false, now, &mut events);
          edge_iter.next();
        } else {
          break;
        }
      }
      if now % BUTTON_TICK_INTERVAL_MS == 0 && machine.wants_timer() {
        machine.timer_tick(now, &mut events);
      }
      for e in events {
        out.push((now, e));
      }
    }
    out
  }

  #[test]
  fn test_triple_tip_timeline() {
    // press@0, release@150, press@250, release@400, press@500, release@650
    // -> nothing at 150, nothing at 400, tip_3x at 650
    let mut machine = ButtonStateMachine::new();
    let timeline = run_timeline(
      &mut machine,
      &[(0, true), (150, false), (250, true), (400, false), (500, true), (650, false)],
      650,
    );
    let emitted: Vec<(u64, DsClickType)> = timeline
      .iter()
      .filter_map(|(t, e)| match e {
        ButtonEvent::Click(ct) => Some((*t, *ct)),
        _ => None,
      })
      .collect();
    assert_eq!(emitted, vec![(650, DsClickType::Tip3x)]);
  }

  #[test]
  fn test_single_click() {
    // short press, then pause past t_click_pause emits click_1x
    let mut machine = ButtonStateMachine::new();
    let timeline = run_timeline(&mut machine, &[(100, true), (180, false)], 1500);
    let emitted: Vec<DsClickType> = timeline
      .iter()
      .filter_map(|(_, e)| match e {
        ButtonEvent::Click(ct) => Some(*ct),
        _ => None,
      })
      .collect();
    assert_eq!(emitted, vec![DsClickType::Click1x]);
    assert!(machine.is_idle());
  }

  #[test]
  fn test_hold_start_repeat_end() {
    let mut machine = ButtonStateMachine::new();
    // press at 100, hold for 2.8 seconds, release
    let timeline = run_timeline(&mut machine, &[(100, true), (2900, false)], 3000);
    let emitted: Vec<DsClickType> = clicks(&timeline.iter().map(|(_, e)| *e).collect::<Vec<_>>());
    // hold starts 500ms after S2 entry; repeats every 1000ms
    assert_eq!(emitted[0], DsClickType::HoldStart);
    assert_eq!(emitted.last(), Some(&DsClickType::HoldEnd));
    let repeats = emitted
      .iter()
      .filter(|c| **c == DsClickType::HoldRepeat)
      .count();
    assert_eq!(repeats, 2);
  }

  #[test]
  fn test_short_release_hold_emits_start_and_end_only() {
    let mut machine = ButtonStateMachine::new();
    let timeline = run_timeline(&mut machine, &[(100, true), (800, false)], 900);
    let emitted: Vec<DsClickType> = clicks(&timeline.iter().map(|(_, e)| *e).collect::<Vec<_>>());
    assert_eq!(emitted, vec![DsClickType::HoldStart, DsClickType::HoldEnd]);
  }

  #[test]
  fn test_short_long() {
    // click then press-and-hold: press@100 release@180 press@300 hold
    let mut machine = ButtonStateMachine::new();
    let timeline = run_timeline(&mut machine, &[(100, true), (180, false), (300, true)], 1200);
    let emitted: Vec<DsClickType> = clicks(&timeline.iter().map(|(_, e)| *e).collect::<Vec<_>>());
    assert_eq!(emitted, vec![DsClickType::ShortLong]);
  }

  #[test]
  fn test_determinism() {
    let edges = [(0u64, true), (150, false), (250, true), (400, false), (500, true), (650, false)];
    let mut m1 = ButtonStateMachine::new();
    let mut m2 = ButtonStateMachine::new();
    let t1 = run_timeline(&mut m1, &edges, 2000);
    let t2 = run_timeline(&mut m2, &edges, 2000);
    assert_eq!(t1, t2);
  }

  #[test]
  fn test_opposite_key_aborts() {
    let mut machine = ButtonStateMachine::new();
    let mut events = Vec::new();
    machine.button_action(true, false, 1000, &mut events);
    assert!(!machine.is_idle());
    // other side of the rocker pressed: abort and restart
    machine.button_action(true, true, 1050, &mut events);
    assert!(machine.second_key());
    assert_eq!(clicks(&events), vec![]);
  }

  #[test]
  fn test_local_button_toggle() {
    let mut machine = ButtonStateMachine::new();
    machine.set_local_button_enabled(true);
    // quick press/release then pause: local switch instead of click_1x
    let timeline = run_timeline(&mut machine, &[(100, true), (180, false)], 600);
    let switches: Vec<bool> = timeline
      .iter()
      .filter_map(|(_, e)| match e {
        ButtonEvent::LocalSwitch(on) => Some(*on),
        _ => None,
      })
      .collect();
    assert_eq!(switches, vec![true]);
    let emitted: Vec<DsClickType> = clicks(&timeline.iter().map(|(_, e)| *e).collect::<Vec<_>>());
    assert_eq!(emitted, vec![DsClickType::LocalOn]);
  }

  #[test]
  fn test_local_dim_direction_reverses() {
    let mut machine = ButtonStateMachine::new();
    machine.set_local_button_enabled(true);
    machine.set_output_on(true);
    // long press enters local dim; dim steps fire every t_dim_repeat_time
    let timeline = run_timeline(&mut machine, &[(100, true), (2000, false)], 2100);
    let dims: Vec<bool> = timeline
      .iter()
      .filter_map(|(_, e)| match e {
        ButtonEvent::LocalDim(up) => Some(*up),
        _ => None,
      })
      .collect();
    assert!(!dims.is_empty());
    assert!(dims.iter().all(|up| *up)); // first entry dims up
    // second long press dims down
    machine.set_output_on(true);
    let timeline = run_timeline(&mut machine, &[(3000, true), (5000, false)], 5100);
    let dims: Vec<bool> = timeline
      .iter()
      .filter_map(|(_, e)| match e {
        ButtonEvent::LocalDim(up) => Some(*up),
        _ => None,
      })
      .collect();
    assert!(!dims.is_empty());
    assert!(dims.iter().all(|up| !*up));
  }

  #[test]
  fn test_repeated_tip3x_in_pause_wait() {
    // the S13 re-arm keeps emitting tip_3x on every further release
    let mut machine = ButtonStateMachine::new();
    let timeline = run_timeline(
      &mut machine,
      &[
        (0, true),
        (150, false),
        (250, true),
        (400, false),
        (500, true),
        (650, false),
        (700, true),
        (850, false),
      ],
      900,
    );
    let emitted: Vec<DsClickType> = clicks(&timeline.iter().map(|(_, e)| *e).collect::<Vec<_>>());
    assert_eq!(emitted, vec![DsClickType::Tip3x, DsClickType::Tip3x]);
  }

  #[test]
  fn test_fifth_tip_resets_to_two() {
    let mut machine = ButtonStateMachine::new();
    machine.click_counter = 4;
    machine.state = State::S4NextTipWait;
    machine.timer_ref = 100;
    let mut events = Vec::new();
    machine.button_action(true, false, 200, &mut events);
    assert_eq!(machine.click_counter, 2);
  }
}
