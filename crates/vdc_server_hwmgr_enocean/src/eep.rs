// vdcd-rs Source Code File - Virtual Device Controller for digitalSTROM.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! EnOcean Equipment Profile (EEP) information extraction from radio
//! telegrams.
//!
//! RPS telegrams carry no explicit learn bit; their EEP signature is a
//! heuristic over the status bits and data bit 7:
//!
//! | T21 | NU | D0.bit7 | classification        |
//! |-----|----|---------|------------------------|
//! |  1  | 0  |    1    | window handle F6-10-00 |
//! |  1  | x  |    0    | 2-rocker F6-02-xx      |
//! |  0  | x  |    x    | 4-rocker F6-03-xx      |
//!
//! 1BS and 4BS telegrams carry an explicit LRN bit (bit 3 of the last
//! user data byte, active low: cleared means teach-in). SmartAck learn
//! requests are teach-ins by definition and carry the full EEP triple.

use crate::esp3::{rorg, Esp3Packet, PacketType, STATUS_NU, STATUS_T21};
use crate::{EnoceanManufacturer, EnoceanProfile};

/// Unknown function/type placeholder within a profile.
pub const EEP_FUNC_UNKNOWN: u8 = 0xFF;
pub const EEP_TYPE_UNKNOWN: u8 = 0xFF;
/// Completely unknown profile.
pub const EEP_PROFILE_UNKNOWN: EnoceanProfile = 0x00FFFF;
/// Mask to compare profiles ignoring the TYPE byte.
pub const EEP_IGNORE_TYPE_MASK: EnoceanProfile = 0xFFFF00;

pub const MANUFACTURER_UNKNOWN: EnoceanManufacturer = 0xFFFF;

/// Signal strength required to accept an implicit (RPS) teach-in; keeps
/// a rocker pressed two rooms away from pairing itself.
pub const MIN_LEARN_DBM: i16 = -50;

pub fn profile(rorg_byte: u8, func: u8, eep_type: u8) -> EnoceanProfile {
  ((rorg_byte as EnoceanProfile) << 16) | ((func as EnoceanProfile) << 8) | eep_type as EnoceanProfile
}

pub fn profile_rorg(profile: EnoceanProfile) -> u8 {
  ((profile >> 16) & 0xFF) as u8
}

pub fn profile_func(profile: EnoceanProfile) -> u8 {
  ((profile >> 8) & 0xFF) as u8
}

pub fn profile_type(profile: EnoceanProfile) -> u8 {
  (profile & 0xFF) as u8
}

const LRN_BIT_MASK: u8 = 0x08;

/// Whether a radio telegram carries teach-in information.
///
/// `min_learn_dbm` gates the implicit RPS signature by signal strength;
/// explicit teach-ins (1BS/4BS learn bit, SmartAck) are always
/// recognized.
pub fn has_teach_info(packet: &Esp3Packet, min_learn_dbm: i16) -> bool {
  if packet.packet_type() != PacketType::Radio {
    return false;
  }
  let user_data = packet.radio_user_data();
  match packet.eep_rorg() {
    Some(rorg::RPS) => packet.radio_dbm() >= min_learn_dbm,
    Some(rorg::ONE_BS) => {
      // LRN bit is active low
      !user_data.is_empty() && (user_data[0] & LRN_BIT_MASK) == 0
    }
    Some(rorg::FOUR_BS) => user_data.len() == 4 && (user_data[3] & LRN_BIT_MASK) == 0,
    Some(rorg::SM_LRN_REQ) => true,
    _ => false,
  }
}

/// Extract the EEP profile from a teach-in telegram.
pub fn eep_profile(packet: &Esp3Packet) -> EnoceanProfile {
  let Some(r) = packet.eep_rorg() else {
    return EEP_PROFILE_UNKNOWN;
  };
  let user_data = packet.radio_user_data();
  match r {
    rorg::RPS => {
      if user_data.is_empty() {
        return EEP_PROFILE_UNKNOWN;
      }
      let status = packet.radio_status();
      let d0 = user_data[0];
      if status & STATUS_T21 != 0 {
        if (d0 & 0x80) != 0 && (status & STATUS_NU) == 0 {
          // window handle, only one type defined
          profile(rorg::RPS, 0x10, 0x00)
        } else if (d0 & 0x80) == 0 {
          // 2-rocker (key card switches overlap this signature and are
          // deliberately folded into it)
          profile(rorg::RPS, 0x02, EEP_TYPE_UNKNOWN)
        } else {
          EEP_PROFILE_UNKNOWN
        }
      } else {
        // must be a 4-rocker
        profile(rorg::RPS, 0x03, EEP_TYPE_UNKNOWN)
      }
    }
    rorg::ONE_BS => {
      // only one 1BS EEP is defined: single contact
      profile(rorg::ONE_BS, 0x00, 0x01)
    }
    rorg::FOUR_BS => {
      if user_data.len() < 2 {
        return EEP_PROFILE_UNKNOWN;
      }
      // FUNC = D3.7..2, TYPE = D3.1..0 | D2.7..3
      let func = user_data[0] >> 2;
      let eep_type = ((user_data[0] & 0x03) << 5) | (user_data[1] >> 3);
      profile(rorg::FOUR_BS, func, eep_type)
    }
    rorg::SM_LRN_REQ => {
      if user_data.len() < 5 {
        return EEP_PROFILE_UNKNOWN;
      }
      profile(user_data[2], user_data[3], user_data[4])
    }
    _ => EEP_PROFILE_UNKNOWN,
  }
}

/// Extract the manufacturer code from a teach-in telegram.
pub fn eep_manufacturer(packet: &Esp3Packet) -> EnoceanManufacturer {
  let user_data = packet.radio_user_data();
  match packet.eep_rorg() {
    Some(rorg::FOUR_BS) if user_data.len() >= 3 => {
      // MANU = D2.2..0 | D1
      (((user_data[1] & 0x07) as u16) << 8) | user_data[2] as u16
    }
    Some(rorg::SM_LRN_REQ) if user_data.len() >= 2 => {
      (((user_data[0] & 0x07) as u16) << 8) | user_data[1] as u16
    }
    _ => MANUFACTURER_UNKNOWN,
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use test_case::test_case;

  fn rps_packet(d0: u8, status: u8, dbm: u8) -> Esp3Packet {
    Esp3Packet::new_radio(rorg::RPS, &[d0], 0x0086_B81A, status).with_dbm(dbm)
  }

  #[test_case(STATUS_T21, 0x80, 0xF6_10_00; "window handle")]
  #[test_case(STATUS_T21 | STATUS_NU, 0x30, 0xF6_02_FF; "two rocker")]
  #[test_case(0, 0x30, 0xF6_03_FF; "four rocker")]
  fn test_rps_classification(status: u8, d0: u8, expected: u32) {
    let packet = rps_packet(d0, status, 30);
    assert_eq!(eep_profile(&packet), expected);
  }

  #[test]
  fn test_rps_learn_gated_by_dbm() {
    // -30 dBm: close enough to learn
    let strong = rps_packet(0x30, STATUS_T21 | STATUS_NU, 30);
    assert!(has_teach_info(&strong, MIN_LEARN_DBM));
    // -80 dBm: too weak, silently not a teach-in
    let weak = rps_packet(0x30, STATUS_T21 | STATUS_NU, 80);
    assert!(!has_teach_info(&weak, MIN_LEARN_DBM));
  }

  #[test]
  fn test_4bs_teach_in_classification() {
    // canonical A5-02-01 teach-in: FUNC=0x02 in D3.7..2, TYPE=0x01 in
    // D2.7..3, manufacturer 0x00B, LRN bit (D0.3) cleared
    let teach = Esp3Packet::new_radio(rorg::FOUR_BS, &[0x08, 0x08, 0x0B, 0x80], 0x0102_0304, 0);
    assert!(has_teach_info(&teach, MIN_LEARN_DBM));
    let p = eep_profile(&teach);
    assert_eq!(profile_rorg(p), rorg::FOUR_BS);
    assert_eq!(profile_func(p), 0x02);
    assert_eq!(profile_type(p), 0x01);
    assert_eq!(eep_manufacturer(&teach), 0x00B);
    // data telegram: LRN bit set means regular data
    let data = Esp3Packet::new_radio(rorg::FOUR_BS, &[0x00, 0x00, 0x80, 0x08], 0x0102_0304, 0);
    assert!(!has_teach_info(&data, MIN_LEARN_DBM));
  }

  #[test]
  fn test_1bs_contact_teach_in() {
    let teach = Esp3Packet::new_radio(rorg::ONE_BS, &[0x00], 0x0102_0304, 0);
    assert!(has_teach_info(&teach, MIN_LEARN_DBM));
    assert_eq!(eep_profile(&teach), profile(rorg::ONE_BS, 0x00, 0x01));
    let data = Esp3Packet::new_radio(rorg::ONE_BS, &[0x09], 0x0102_0304, 0);
    assert!(!has_teach_info(&data, MIN_LEARN_DBM));
  }

  #[test]
  fn test_smart_ack_learn_request() {
    // [manu-hi manu-lo RORG FUNC TYPE ...]
    let packet = Esp3Packet::new_radio(
      rorg::SM_LRN_REQ,
      &[0x01, 0x8B, 0xA5, 0x02, 0x01, 0x00],
      0x0102_0304,
      0,
    );
    assert!(has_teach_info(&packet, MIN_LEARN_DBM));
    assert_eq!(eep_profile(&packet), profile(rorg::FOUR_BS, 0x02, 0x01));
    assert_eq!(eep_manufacturer(&packet), 0x18B);
  }
}
