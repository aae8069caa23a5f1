// vdcd-rs Source Code File - Virtual Device Controller for digitalSTROM.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! DALI device class container.
//!
//! Talks to the ballasts through a DALI bridge (the bus timing lives in
//! the bridge; the link runs a simple framed protocol at pseudo-baudrate
//! 9600). [dali_comm] holds the command set, bridge contract and the
//! logarithmic arc-power conversions; [dali_vdc] runs the bus scan /
//! device-info collection pipeline and owns the resulting light devices.

#[macro_use]
extern crate log;

pub mod dali_comm;
mod dali_vdc;

pub use dali_vdc::{DaliVdc, DALI_CLASS_ID};

/// DALI short address, 0..63.
pub type DaliAddress = u8;
