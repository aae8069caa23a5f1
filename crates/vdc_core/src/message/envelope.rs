// vdcd-rs Source Code File - Virtual Device Controller for digitalSTROM.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

use getset::Getters;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::VdcError;

pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC request id. The vdSM uses both string and numeric ids; we
/// preserve whatever we were given so replies match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
  Number(i64),
  String(String),
}

impl std::fmt::Display for RpcId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      RpcId::Number(n) => write!(f, "{n}"),
      RpcId::String(s) => write!(f, "{s}"),
    }
  }
}

/// An incoming or outgoing JSON-RPC request. A request without an id is a
/// notification and gets no reply.
#[derive(Debug, Clone, Serialize, Deserialize, Getters)]
pub struct RpcRequest {
  #[serde(rename = "jsonrpc")]
  #[getset(get = "pub")]
  version: String,
  #[getset(get = "pub")]
  method: String,
  #[serde(default, skip_serializing_if = "Value::is_null")]
  #[getset(get = "pub")]
  params: Value,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  #[getset(get = "pub")]
  id: Option<RpcId>,
}

impl RpcRequest {
  pub fn new(method: &str, params: Value, id: Option<RpcId>) -> Self {
    Self {
      version: JSONRPC_VERSION.to_owned(),
      method: method.to_owned(),
      params,
      id,
    }
  }

  /// Notifications carry no id and must not be answered.
  pub fn is_notification(&self) -> bool {
    self.id.is_none()
  }
}

/// JSON-RPC error object carried in error responses.
#[derive(Debug, Clone, Serialize, Deserialize, Getters)]
#[getset(get = "pub")]
pub struct RpcErrorObject {
  code: i32,
  message: String,
}

impl From<&VdcError> for RpcErrorObject {
  fn from(err: &VdcError) -> Self {
    Self {
      code: err.code(),
      message: err.to_string(),
    }
  }
}

/// A JSON-RPC response, either a result or an error, always tagged with
/// the id of the request it answers.
#[derive(Debug, Clone, Serialize, Deserialize, Getters)]
pub struct RpcResponse {
  #[serde(rename = "jsonrpc")]
  #[getset(get = "pub")]
  version: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  #[getset(get = "pub")]
  result: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  #[getset(get = "pub")]
  error: Option<RpcErrorObject>,
  #[getset(get = "pub")]
  id: RpcId,
}

impl RpcResponse {
  pub fn success(result: Value, id: RpcId) -> Self {
    Self {
      version: JSONRPC_VERSION.to_owned(),
      result: Some(result),
      error: None,
      id,
    }
  }

  pub fn failure(err: &VdcError, id: RpcId) -> Self {
    Self {
      version: JSONRPC_VERSION.to_owned(),
      result: None,
      error: Some(RpcErrorObject::from(err)),
      id,
    }
  }

  pub fn is_error(&self) -> bool {
    self.error.is_some()
  }
}
