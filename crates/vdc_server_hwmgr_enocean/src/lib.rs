// vdcd-rs Source Code File - Virtual Device Controller for digitalSTROM.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! EnOcean device class container.
//!
//! Speaks ESP3 over a byte port to an EnOcean modem (TCM3xx): byte-exact
//! framing with CRC8 and self-resyncing scanner ([esp3]), EnOcean
//! Equipment Profile classification of teach-in telegrams ([eep]),
//! per-profile channel handlers decoding RPS rockers, 1BS contacts and
//! 4BS sensor bit fields ([handlers]), and the [EnoceanVdc] container
//! with learn-in/learn-out and persisted device pairing.

#[macro_use]
extern crate log;

pub mod eep;
pub mod esp3;
pub mod handlers;
mod enocean_vdc;

pub use enocean_vdc::{spawn_port_reader, EnoceanPort, EnoceanVdc, ENOCEAN_CLASS_ID};

/// 32 bit EnOcean module address.
pub type EnoceanAddress = u32;
/// Index of a logical sub-device within one physical EnOcean module.
pub type EnoceanSubDevice = u8;
/// EEP profile packed as RORG<<16 | FUNC<<8 | TYPE.
pub type EnoceanProfile = u32;
/// 11 bit EnOcean manufacturer code.
pub type EnoceanManufacturer = u16;
