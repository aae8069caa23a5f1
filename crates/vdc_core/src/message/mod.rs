// vdcd-rs Source Code File - Virtual Device Controller for digitalSTROM.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Upstream (vdSM) API message types.
//!
//! The wire format is JSON-RPC 2.0 over a stream transport, one message
//! per line. Every non-session method and notification carries a `dSID`
//! parameter addressing either a device or the vDC host itself; the
//! session methods are `hello` and `bye`.

mod envelope;
mod params;
pub mod serializer;

pub use envelope::{RpcErrorObject, RpcId, RpcRequest, RpcResponse, JSONRPC_VERSION};
pub use params::{
  AddressedParams,
  ByeParams,
  CallSceneParams,
  ControlValueParams,
  GetPropertyParams,
  HelloParams,
  HelloResult,
  SceneParams,
  SetPropertyParams,
};

/// The only API version literal the host accepts in `hello`.
pub const VDC_API_VERSION: &str = "1.0";

// Method name literals, used for routing on both directions.
pub const METHOD_HELLO: &str = "hello";
pub const METHOD_BYE: &str = "bye";
pub const METHOD_ANNOUNCE: &str = "announce";
pub const METHOD_VANISH: &str = "vanish";
pub const METHOD_PING: &str = "Ping";
pub const METHOD_PONG: &str = "Pong";
pub const METHOD_CALL_SCENE: &str = "callScene";
pub const METHOD_SAVE_SCENE: &str = "saveScene";
pub const METHOD_UNDO_SCENE: &str = "undoScene";
pub const METHOD_SET_LOCAL_PRIORITY: &str = "setLocalPriority";
pub const METHOD_CALL_SCENE_MIN: &str = "callSceneMin";
pub const METHOD_SET_CONTROL_VALUE: &str = "setControlValue";
pub const METHOD_IDENTIFY: &str = "identify";
pub const METHOD_REMOVE: &str = "remove";
pub const METHOD_GET_PROPERTY: &str = "getProperty";
pub const METHOD_SET_PROPERTY: &str = "setProperty";
