// vdcd-rs Source Code File - Virtual Device Controller for digitalSTROM.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The vDC object model and host.
//!
//! This crate owns everything between the upstream vdSM API and the
//! per-technology hardware managers:
//!
//! - the uniform hierarchical property tree ([property]),
//! - the schema-versioned SQLite parameter store ([persist]),
//! - behaviours (button, binary input, sensor, output) and their
//!   channels ([behaviour]),
//! - the per-device scene table with built-in defaults and file
//!   overlays ([scene]),
//! - the [device::Device] aggregate with the scene call pipeline,
//! - the [vdc::Vdc] trait implemented by each technology crate,
//! - the [host::VdcHost] owning all of the above plus the session,
//!   announce and periodic save loops.
//!
//! ## Host lifetime
//!
//! The host is built with one `Vdc` per configured technology, collects
//! devices once at startup, then serves the vdSM API. Only one inbound
//! connection is "the session" at a time; a session starts with `hello`,
//! ends with `bye`, connection loss or a 3 minute activity timeout.
//! While a session is active the host announces every public device and
//! re-announces devices whose announcement was never confirmed.

#[macro_use]
extern crate log;

pub mod behaviour;
pub mod device;
pub mod host;
pub mod persist;
pub mod property;
pub mod scene;
pub mod vdc;
