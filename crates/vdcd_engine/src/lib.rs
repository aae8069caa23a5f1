// vdcd-rs Source Code File - Virtual Device Controller for digitalSTROM.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Engine wiring for the vdcd binary: option handling, transport
//! construction (serial or TCP bridges for DALI and EnOcean), host
//! assembly and the run loop.

#[macro_use]
extern crate log;

mod engine;
mod options;
mod transport;

pub use engine::{VdcdEngine, EXIT_FACTORY_RESET_CLEAN, EXIT_FACTORY_RESET_CONFIRMED, EXIT_FIRMWARE_UPDATE, EXIT_OK};
pub use options::EngineOptions;
