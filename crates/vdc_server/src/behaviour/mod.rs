// vdcd-rs Source Code File - Virtual Device Controller for digitalSTROM.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Behaviours: the dS-defined facets of a device.
//!
//! A behaviour is one role a device plays in the dS system - button,
//! binary input, sensor or output - not a hardware driver. Each exposes
//! three property groups: description (read-only hardware facts),
//! settings (read/write, persisted) and state (volatile).

pub mod binary_input;
pub mod button;
pub mod channel;
pub mod output;
pub mod sensor;

pub use binary_input::BinaryInputBehaviour;
pub use button::{ButtonBehaviour, ButtonEvent, ButtonStateMachine};
pub use channel::{Channel, ChannelDescriptor, ChannelType};
pub use output::OutputBehaviour;
pub use sensor::SensorBehaviour;

use vdc_core::dsdefs::{DsGroup, DsHardwareError};

/// Behaviour kind tags. The string forms match the prefixes of the
/// device-level behaviour array property names ("buttons",
/// "binaryInputs", "sensors", "outputs").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BehaviourKind {
  Button,
  BinaryInput,
  Sensor,
  Output,
}

impl BehaviourKind {
  pub fn type_name(&self) -> &'static str {
    match self {
      BehaviourKind::Button => "button",
      BehaviourKind::BinaryInput => "binaryInput",
      BehaviourKind::Sensor => "sensor",
      BehaviourKind::Output => "output",
    }
  }
}

/// Fields common to every behaviour.
#[derive(Debug, Clone)]
pub struct BehaviourBase {
  /// Index within the device's behaviour vector of this kind.
  pub index: usize,
  /// Human label reported in the description properties.
  pub hardware_name: String,
  /// dS group this behaviour belongs to.
  pub group: DsGroup,
  /// Current hardware error status.
  pub hardware_error: DsHardwareError,
}

impl BehaviourBase {
  pub fn new(index: usize, hardware_name: &str, group: DsGroup) -> Self {
    Self {
      index,
      hardware_name: hardware_name.to_owned(),
      group,
      hardware_error: DsHardwareError::None,
    }
  }
}
