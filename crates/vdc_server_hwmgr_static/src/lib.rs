// vdcd-rs Source Code File - Virtual Device Controller for digitalSTROM.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Static device class container: devices that exist because the
//! configuration says so, not because a bus scan found them.
//!
//! Covers console test stubs (a keyboard key as button, a log line as
//! output) and digital I/O pins. The pin/key access itself goes through
//! a narrow trait so the container never touches hardware directly.

#[macro_use]
extern crate log;

mod static_vdc;

pub use static_vdc::{DigitalIo, StaticDeviceConfig, StaticVdc, StaticIoMode, STATIC_CLASS_ID};
