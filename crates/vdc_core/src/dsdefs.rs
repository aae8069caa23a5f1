// vdcd-rs Source Code File - Virtual Device Controller for digitalSTROM.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! digitalSTROM system-wide definitions: scene numbers, groups, click
//! types, button/output/sensor classification enums.

use serde_repr::{Deserialize_repr, Serialize_repr};
use strum_macros::EnumIter;

/// dS scene number (0..127 defined, 0..79 with built-in defaults).
pub type SceneNo = u8;

// Zone scene numbers
pub const T0_S0: SceneNo = 0; // main off
pub const T1_S0: SceneNo = 1; // area 1 off
pub const T2_S0: SceneNo = 2; // area 2 off
pub const T3_S0: SceneNo = 3; // area 3 off
pub const T4_S0: SceneNo = 4; // area 4 off
pub const T0_S1: SceneNo = 5; // main on
pub const T1_S1: SceneNo = 6; // area 1 on
pub const T2_S1: SceneNo = 7; // area 2 on
pub const T3_S1: SceneNo = 8; // area 3 on
pub const T4_S1: SceneNo = 9; // area 4 on
pub const T1234_CONT: SceneNo = 10; // area 1-4 increment/decrement continue
pub const DEC_S: SceneNo = 11; // decrement value
pub const INC_S: SceneNo = 12; // increment value
pub const MIN_S: SceneNo = 13; // minimum value
pub const MAX_S: SceneNo = 14; // maximum value
pub const STOP_S: SceneNo = 15; // stop
pub const T0_S2: SceneNo = 17;
pub const T0_S3: SceneNo = 18;
pub const T0_S4: SceneNo = 19;
pub const T1_S2: SceneNo = 20;
pub const T1_S3: SceneNo = 21;
pub const T1_S4: SceneNo = 22;
pub const T2_S2: SceneNo = 23;
pub const T2_S3: SceneNo = 24;
pub const T2_S4: SceneNo = 25;
pub const T3_S2: SceneNo = 26;
pub const T3_S3: SceneNo = 27;
pub const T3_S4: SceneNo = 28;
pub const T4_S2: SceneNo = 29;
pub const T4_S3: SceneNo = 30;
pub const T4_S4: SceneNo = 31;
pub const T1E_S0: SceneNo = 32;
pub const T1E_S1: SceneNo = 33;
pub const T2E_S0: SceneNo = 34;
pub const T2E_S1: SceneNo = 35;
pub const T3E_S0: SceneNo = 36;
pub const T3E_S1: SceneNo = 37;
pub const T4E_S0: SceneNo = 38;
pub const T4E_S1: SceneNo = 39;
pub const AUTO_OFF: SceneNo = 40; // fade down to 0 in one minute
pub const T1_DEC: SceneNo = 42;
pub const T1_INC: SceneNo = 43;
pub const T2_DEC: SceneNo = 44;
pub const T2_INC: SceneNo = 45;
pub const T3_DEC: SceneNo = 46;
pub const T3_INC: SceneNo = 47;
pub const T4_DEC: SceneNo = 48;
pub const T4_INC: SceneNo = 49;
pub const LOCAL_OFF: SceneNo = 50;
pub const LOCAL_ON: SceneNo = 51;
pub const T1_STOP_S: SceneNo = 52;
pub const T2_STOP_S: SceneNo = 53;
pub const T3_STOP_S: SceneNo = 54;
pub const T4_STOP_S: SceneNo = 55;

// Apartment-wide scene numbers
pub const START_APARTMENT_SCENES: SceneNo = 64;
pub const AUTO_STANDBY: SceneNo = START_APARTMENT_SCENES;
pub const SIG_PANIC: SceneNo = START_APARTMENT_SCENES + 1;
pub const ENERGY_OL: SceneNo = START_APARTMENT_SCENES + 2;
pub const STANDBY: SceneNo = START_APARTMENT_SCENES + 3;
pub const DEEP_OFF: SceneNo = START_APARTMENT_SCENES + 4;
pub const SLEEPING: SceneNo = START_APARTMENT_SCENES + 5;
pub const WAKE_UP: SceneNo = START_APARTMENT_SCENES + 6;
pub const PRESENT: SceneNo = START_APARTMENT_SCENES + 7;
pub const ABSENT: SceneNo = START_APARTMENT_SCENES + 8;
pub const SIG_BELL: SceneNo = START_APARTMENT_SCENES + 9;
pub const SIG_ALARM: SceneNo = START_APARTMENT_SCENES + 10;
pub const ZONE_ACTIVE: SceneNo = START_APARTMENT_SCENES + 11;
pub const FIRE: SceneNo = START_APARTMENT_SCENES + 12;
pub const SMOKE: SceneNo = START_APARTMENT_SCENES + 13;
pub const WATER: SceneNo = START_APARTMENT_SCENES + 14;
pub const GAS: SceneNo = START_APARTMENT_SCENES + 15;

/// Number of scenes with built-in defaults.
pub const NUM_DEFAULT_SCENES: usize = 80;

/// dS group/color (upper 4 bits in LTNUMGRP0).
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize_repr, Deserialize_repr, EnumIter,
)]
#[repr(u8)]
pub enum DsGroup {
  #[default]
  Variable = 0,
  YellowLight = 1,
  GreyShadow = 2,
  BlueClimate = 3,
  CyanAudio = 4,
  MagentaVideo = 5,
  RedSecurity = 6,
  GreenAccess = 7,
  BlackJoker = 8,
  White = 9,
  Displays = 10,
}

/// 64 bit group membership mask, bit 0 = group 0.
pub type DsGroupMask = u64;

/// Button click types emitted by the button state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum DsClickType {
  Tip1x = 0,
  Tip2x = 1,
  Tip3x = 2,
  Tip4x = 3,
  HoldStart = 4,
  HoldRepeat = 5,
  HoldEnd = 6,
  Click1x = 7,
  Click2x = 8,
  Click3x = 9,
  ShortLong = 10,
  LocalOff = 11,
  LocalOn = 12,
  ShortShortLong = 13,
  LocalStop = 14,
  /// no click (for state reads)
  None = 255,
}

/// Button mode aka "LTMODE".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum DsButtonMode {
  Standard = 0,
  Turbo = 1,
  Presence = 2,
  Switch = 3,
  RockerDown1 = 5,
  RockerDown2 = 6,
  RockerDown3 = 7,
  RockerDown4 = 8,
  RockerUp1 = 9,
  RockerUp2 = 10,
  RockerUp3 = 11,
  RockerUp4 = 12,
  RockerUpDown = 13,
  StandardMulti = 14,
  Inactive = 255,
}

impl DsButtonMode {
  /// Two-way (rocker) modes occupy the contiguous range RockerDown1..RockerUpDown.
  pub fn is_two_way(&self) -> bool {
    (*self as u8) >= DsButtonMode::RockerDown1 as u8 && (*self as u8) <= DsButtonMode::RockerUpDown as u8
  }
}

/// Button hardware kinds (buttonDescriptions[].buttonType).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum DsButtonType {
  #[default]
  Undefined = 0,
  Single = 1,
  TwoWay = 2,
  FourWay = 3,
  FourWayWithCenter = 4,
  EightWayWithCenter = 5,
  OnOffSwitch = 6,
}

/// Button element IDs (buttonDescriptions[].buttonElementID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum DsButtonElement {
  #[default]
  Center = 0,
  Down = 1,
  Up = 2,
  Left = 3,
  Right = 4,
  UpperLeft = 5,
  LowerLeft = 6,
  UpperRight = 7,
  LowerRight = 8,
}

/// Button function aka "LTNUM" (lower 4 bits in LTNUMGRP0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum DsButtonFunc {
  Device = 0,
  Area1Preset0x = 1,
  Area2Preset0x = 2,
  Area3Preset0x = 3,
  Area4Preset0x = 4,
  RoomPreset0x = 5,
  RoomPreset1x = 6,
  RoomPreset2x = 7,
  RoomPreset3x = 8,
  RoomPreset4x = 9,
  Area1Preset1x = 10,
  Area2Preset2x = 11,
  Area3Preset3x = 12,
  Area4Preset4x = 13,
  Apartment = 14,
  App = 15,
}

/// Output functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum DsOutputFunction {
  #[default]
  Switch = 0,
  Dimmer = 1,
  Positional = 2,
}

/// Output modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum DsOutputMode {
  #[default]
  Disabled = 0,
  Binary = 1,
  Gradual = 2,
}

/// Hardware error status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum DsHardwareError {
  #[default]
  None = 0,
  OpenCircuit = 1,
  ShortCircuit = 2,
  Overload = 3,
  BusConnection = 4,
  LowBattery = 5,
  DeviceError = 6,
}

/// Sensor types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum DsSensorType {
  #[default]
  None = 0,
  Temperature = 1,
  Humidity = 2,
  Illumination = 3,
  SupplyVoltage = 4,
  GasCO = 5,
  GasRadon = 6,
  GasType = 7,
  DustPm10 = 8,
  DustPm2_5 = 9,
  DustPm1 = 10,
  SetPoint = 11,
  FanSpeed = 12,
  WindSpeed = 13,
}

/// Binary input types (sensor functions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum DsBinaryInputType {
  #[default]
  None = 0,
  Presence = 1,
  Light = 2,
  PresenceInDarkness = 3,
  Twilight = 4,
  Motion = 5,
  MotionInDarkness = 6,
  Smoke = 7,
  Wind = 8,
  Rain = 9,
  Sun = 10,
  Thermostat = 11,
}

/// The area (1..4) a scene number belongs to, 0 for non-area scenes.
/// Only the area on/off, area dim and area stop scenes carry an area;
/// the per-area presets (T1_S2.. and the extended T1E_.. scenes) do not.
pub fn area_from_scene(scene: SceneNo) -> u8 {
  match scene {
    T1_S0 | T1_S1 | T1_DEC | T1_INC | T1_STOP_S => 1,
    T2_S0 | T2_S1 | T2_DEC | T2_INC | T2_STOP_S => 2,
    T3_S0 | T3_S1 | T3_DEC | T3_INC | T3_STOP_S => 3,
    T4_S0 | T4_S1 | T4_DEC | T4_INC | T4_STOP_S => 4,
    _ => 0,
  }
}

/// The "area on" scene whose dontCare flag determines area membership.
pub fn main_scene_for_area(area: u8) -> SceneNo {
  match area {
    1 => T1_S1,
    2 => T2_S1,
    3 => T3_S1,
    4 => T4_S1,
    _ => T0_S1,
  }
}

/// Normalize any dimming scene (global or per-area) to INC_S/DEC_S/STOP_S,
/// 0 for non-dimming scenes.
pub fn main_dim_scene(scene: SceneNo) -> SceneNo {
  match scene {
    INC_S | T1_INC | T2_INC | T3_INC | T4_INC => INC_S,
    DEC_S | T1_DEC | T2_DEC | T3_DEC | T4_DEC => DEC_S,
    STOP_S | T1_STOP_S | T2_STOP_S | T3_STOP_S | T4_STOP_S => STOP_S,
    _ => 0,
  }
}

/// Area off scenes (T1_S0..T4_S0) end local priority when called.
pub fn is_area_off_scene(scene: SceneNo) -> bool {
  (T1_S0..=T4_S0).contains(&scene)
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn test_area_classification() {
    assert_eq!(area_from_scene(T0_S1), 0);
    assert_eq!(area_from_scene(T1_S0), 1);
    assert_eq!(area_from_scene(T4_INC), 4);
    assert_eq!(area_from_scene(T2_STOP_S), 2);
    assert_eq!(area_from_scene(SIG_PANIC), 0);
    // per-area presets and extended presets are NOT area scenes
    assert_eq!(area_from_scene(T1_S2), 0);
    assert_eq!(area_from_scene(T4_S4), 0);
    assert_eq!(area_from_scene(T1E_S0), 0);
    assert_eq!(area_from_scene(T3E_S1), 0);
    assert_eq!(main_scene_for_area(3), T3_S1);
  }

  #[test]
  fn test_dim_scene_normalization() {
    assert_eq!(main_dim_scene(T2_INC), INC_S);
    assert_eq!(main_dim_scene(T3_DEC), DEC_S);
    assert_eq!(main_dim_scene(T4_STOP_S), STOP_S);
    assert_eq!(main_dim_scene(T0_S1), 0);
  }

  #[test]
  fn test_two_way_modes() {
    assert!(DsButtonMode::RockerUpDown.is_two_way());
    assert!(DsButtonMode::RockerDown1.is_two_way());
    assert!(!DsButtonMode::Standard.is_two_way());
    assert!(!DsButtonMode::Inactive.is_two_way());
  }
}
