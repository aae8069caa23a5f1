// vdcd-rs Source Code File - Virtual Device Controller for digitalSTROM.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Output channels: single continuous values controlled by an output
//! behaviour, with cached/previous/transitional state tracking.

use std::time::{Duration, Instant};

use serde_repr::{Deserialize_repr, Serialize_repr};

/// dS output channel types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum ChannelType {
  #[default]
  Undefined = 0,
  Brightness = 1,
  Hue = 2,
  Saturation = 3,
  ColorTemperature = 4,
  X = 5,
  Y = 6,
  ShadePositionOutside = 7,
  ShadePositionIndoor = 8,
  ShadeAngleOutside = 9,
  ShadeAngleIndoor = 10,
  AirFlowIntensity = 11,
}

/// Static facts about a channel.
#[derive(Debug, Clone)]
pub struct ChannelDescriptor {
  pub channel_type: ChannelType,
  pub name: &'static str,
  pub min: f64,
  pub max: f64,
  pub resolution: f64,
  /// Value change per millisecond when dimming.
  pub dim_per_ms: f64,
  /// Dimming beyond min/max wraps around (hue) instead of clamping.
  pub wraps_around: bool,
}

impl ChannelDescriptor {
  /// The standard brightness channel, 0..100 percent of full scale.
  pub const fn brightness() -> Self {
    Self {
      channel_type: ChannelType::Brightness,
      name: "brightness",
      min: 0.0,
      max: 100.0,
      resolution: 0.1,
      // full range in 7 seconds, as per dS dimming conventions
      dim_per_ms: 100.0 / 7000.0,
      wraps_around: false,
    }
  }

  /// 0..360 degree hue channel, wrapping.
  pub const fn hue() -> Self {
    Self {
      channel_type: ChannelType::Hue,
      name: "hue",
      min: 0.0,
      max: 360.0,
      resolution: 0.6,
      dim_per_ms: 360.0 / 7000.0,
      wraps_around: true,
    }
  }
}

/// One output channel value slot.
///
/// Invariants: `min <= cached <= max`; `previous == cached` implies
/// `progress == 1`; while `update_pending` is set, `last_sync` is
/// undefined (cleared).
#[derive(Debug, Clone)]
pub struct Channel {
  descriptor: ChannelDescriptor,
  cached: f64,
  previous: f64,
  /// Transition progress in 0..1; 1 means not in transition.
  progress: f64,
  last_sync: Option<Instant>,
  update_pending: bool,
  next_transition_time: Duration,
}

impl Channel {
  pub fn new(descriptor: ChannelDescriptor) -> Self {
    let min = descriptor.min;
    Self {
      descriptor,
      cached: min,
      previous: min,
      progress: 1.0,
      last_sync: None,
      update_pending: false,
      next_transition_time: Duration::ZERO,
    }
  }

  pub fn descriptor(&self) -> &ChannelDescriptor {
    &self.descriptor
  }

  pub fn channel_type(&self) -> ChannelType {
    self.descriptor.channel_type
  }

  pub fn cached_value(&self) -> f64 {
    self.cached
  }

  pub fn last_sync(&self) -> Option<Instant> {
    self.last_sync
  }

  pub fn needs_applying(&self) -> bool {
    self.update_pending
  }

  pub fn transition_time(&self) -> Duration {
    self.next_transition_time
  }

  pub fn in_transition(&self) -> bool {
    self.progress < 1.0
  }

  fn clip(&self, value: f64) -> f64 {
    value.clamp(self.descriptor.min, self.descriptor.max)
  }

  /// The value the output should show right now, interpolated between
  /// the previous value and the target while a transition is running.
  pub fn transitional_value(&self) -> f64 {
    self.previous + self.progress * (self.cached - self.previous)
  }

  /// Set a new target value. Only records a pending change when the
  /// change exceeds the channel resolution, unless `always_apply` is set
  /// or a transition is already in progress.
  pub fn set_channel_value(&mut self, value: f64, transition_time: Duration, always_apply: bool) {
    let value = self.clip(value);
    let changed = (value - self.cached).abs() >= self.descriptor.resolution;
    if changed || always_apply || self.in_transition() {
      self.previous = self.transitional_value();
      self.cached = value;
      self.next_transition_time = transition_time;
      if transition_time.is_zero() {
        self.previous = value;
        self.progress = 1.0;
      } else {
        self.progress = 0.0;
      }
      self.update_pending = true;
      self.last_sync = None;
    }
  }

  /// Dim by a step. Underflow/overflow wraps for wrap-around channels
  /// (hue) and clamps otherwise.
  pub fn dim_channel_value(&mut self, step: f64, transition_time: Duration) {
    let mut value = self.transitional_value() + step;
    if self.descriptor.wraps_around {
      let span = self.descriptor.max - self.descriptor.min;
      while value >= self.descriptor.max {
        value -= span;
      }
      while value < self.descriptor.min {
        value += span;
      }
    }
    let value = self.clip(value);
    self.previous = self.transitional_value();
    self.cached = value;
    self.next_transition_time = transition_time;
    self.progress = if transition_time.is_zero() { 1.0 } else { 0.0 };
    if transition_time.is_zero() {
      self.previous = value;
    }
    self.update_pending = true;
    self.last_sync = None;
  }

  /// Update the cache from a hardware read-back. Ignored while a write
  /// is pending, unless `always_sync` forces the overwrite.
  pub fn sync_channel_value(&mut self, actual: f64, always_sync: bool) {
    if !self.update_pending || always_sync {
      self.cached = self.clip(actual);
      self.previous = self.cached;
      self.progress = 1.0;
      self.update_pending = false;
      self.last_sync = Some(Instant::now());
    }
  }

  /// Advance the transition by a progress increment.
  pub fn transition_step(&mut self, step_size: f64) {
    self.set_transition_progress(self.progress + step_size);
  }

  pub fn set_transition_progress(&mut self, progress: f64) {
    self.progress = progress.clamp(0.0, 1.0);
    if self.progress >= 1.0 {
      self.previous = self.cached;
      self.progress = 1.0;
    }
  }

  pub fn transition_progress(&self) -> f64 {
    self.progress
  }

  /// The hardware confirmed the pending value. `force_done` also ends a
  /// running transition (used by outputs without autonomous fading).
  pub fn channel_value_applied(&mut self, force_done: bool) {
    self.update_pending = false;
    self.last_sync = Some(Instant::now());
    if force_done || self.next_transition_time.is_zero() {
      self.previous = self.cached;
      self.progress = 1.0;
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn test_set_and_apply() {
    let mut ch = Channel::new(ChannelDescriptor::brightness());
    ch.set_channel_value(120.0, Duration::ZERO, false);
    assert_eq!(ch.cached_value(), 100.0); // clipped to full scale
    assert!(ch.needs_applying());
    assert!(ch.last_sync().is_none());
    ch.channel_value_applied(false);
    assert!(!ch.needs_applying());
    assert!(ch.last_sync().is_some());
    assert_eq!(ch.transitional_value(), 100.0);
    assert!(!ch.in_transition());
  }

  #[test]
  fn test_below_resolution_is_ignored() {
    let mut ch = Channel::new(ChannelDescriptor::brightness());
    ch.set_channel_value(50.0, Duration::ZERO, false);
    ch.channel_value_applied(false);
    ch.set_channel_value(50.05, Duration::ZERO, false);
    assert!(!ch.needs_applying());
    // but always_apply forces it through
    ch.set_channel_value(50.05, Duration::ZERO, true);
    assert!(ch.needs_applying());
  }

  #[test]
  fn test_transition_interpolation() {
    let mut ch = Channel::new(ChannelDescriptor::brightness());
    ch.set_channel_value(40.0, Duration::ZERO, false);
    ch.channel_value_applied(false);
    ch.set_channel_value(80.0, Duration::from_secs(1), false);
    assert_eq!(ch.transitional_value(), 40.0);
    ch.set_transition_progress(0.5);
    assert_eq!(ch.transitional_value(), 60.0);
    assert!(ch.in_transition());
    ch.transition_step(0.5);
    assert_eq!(ch.transitional_value(), 80.0);
    assert!(!ch.in_transition());
  }

  #[test]
  fn test_sync_respects_pending_write() {
    let mut ch = Channel::new(ChannelDescriptor::brightness());
    ch.set_channel_value(42.0, Duration::ZERO, false);
    ch.sync_channel_value(7.0, false);
    assert_eq!(ch.cached_value(), 42.0); // pending write wins
    ch.sync_channel_value(7.0, true);
    assert_eq!(ch.cached_value(), 7.0); // forced sync overwrites
    assert!(!ch.needs_applying());
  }

  #[test]
  fn test_dim_wraps_hue() {
    let mut ch = Channel::new(ChannelDescriptor::hue());
    ch.set_channel_value(350.0, Duration::ZERO, false);
    ch.channel_value_applied(false);
    ch.dim_channel_value(20.0, Duration::ZERO);
    assert_eq!(ch.cached_value(), 10.0);
    ch.dim_channel_value(-30.0, Duration::ZERO);
    assert_eq!(ch.cached_value(), 340.0);
  }

  #[test]
  fn test_dim_clamps_brightness() {
    let mut ch = Channel::new(ChannelDescriptor::brightness());
    ch.set_channel_value(95.0, Duration::ZERO, false);
    ch.channel_value_applied(false);
    ch.dim_channel_value(20.0, Duration::ZERO);
    assert_eq!(ch.cached_value(), 100.0);
  }
}
