// vdcd-rs Source Code File - Virtual Device Controller for digitalSTROM.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Core types shared by the vDC host and the per-technology device class
//! containers: the dSUID identifier model, the digitalSTROM definitions
//! (groups, scene numbers, click types), the upstream vdSM API message
//! types with their JSON-RPC 2.0 codec, and the error model.
//!
//! Nothing in this crate touches hardware or persistence; those concerns
//! live in `vdc_server` and the `vdc_server_hwmgr_*` crates.

#[macro_use]
extern crate log;

pub mod dsdefs;
pub mod errors;
pub mod ident;
pub mod message;
pub mod util;

use futures::future::BoxFuture;

use errors::VdcError;

/// Result type used throughout the vDC stack.
pub type VdcResult<T = ()> = Result<T, VdcError>;

/// Future type for fallible async vDC operations.
pub type VdcResultFuture<T = ()> = BoxFuture<'static, Result<T, VdcError>>;
