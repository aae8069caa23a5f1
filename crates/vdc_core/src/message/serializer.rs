// vdcd-rs Source Code File - Virtual Device Controller for digitalSTROM.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Line-delimited JSON-RPC 2.0 codec for the vdSM connection.

use serde::Serialize;
use serde_json::Value;

use super::envelope::{RpcRequest, RpcResponse};
use crate::errors::{VdcApiError, VdcError};
use crate::VdcResult;

/// A parsed inbound wire message.
#[derive(Debug, Clone)]
pub enum IncomingMessage {
  /// Method call or notification from the peer.
  Request(RpcRequest),
  /// Response to a request we sent (announce etc.).
  Response(RpcResponse),
}

/// Parse one line from the wire. Lines that are not valid JSON-RPC 2.0
/// objects are rejected; the caller decides whether to drop or to answer
/// with a protocol error.
pub fn parse_line(line: &str) -> VdcResult<IncomingMessage> {
  let value: Value = serde_json::from_str(line)
    .map_err(|e| VdcApiError::InvalidParameter(format!("invalid JSON: {e}")))?;
  let obj = value
    .as_object()
    .ok_or_else(|| VdcError::from(VdcApiError::InvalidParameter("not a JSON object".into())))?;
  if obj.get("jsonrpc").and_then(Value::as_str) != Some(super::JSONRPC_VERSION) {
    return Err(VdcApiError::InvalidParameter("missing jsonrpc version".into()).into());
  }
  if obj.contains_key("method") {
    let request: RpcRequest = serde_json::from_value(value)
      .map_err(|e| VdcApiError::InvalidParameter(format!("malformed request: {e}")))?;
    trace!("parsed request: method={}", request.method());
    Ok(IncomingMessage::Request(request))
  } else if obj.contains_key("result") || obj.contains_key("error") {
    let response: RpcResponse = serde_json::from_value(value)
      .map_err(|e| VdcApiError::InvalidParameter(format!("malformed response: {e}")))?;
    Ok(IncomingMessage::Response(response))
  } else {
    Err(VdcApiError::InvalidParameter("neither request nor response".into()).into())
  }
}

/// Serialize an outbound message to one wire line (no trailing newline).
pub fn to_line<M: Serialize>(msg: &M) -> VdcResult<String> {
  serde_json::to_string(msg)
    .map_err(|e| VdcApiError::GeneralFailure(format!("serialization failed: {e}")).into())
}

/// Deserialize typed method parameters, mapping failures onto API error 400.
pub fn parse_params<T: serde::de::DeserializeOwned>(params: &Value) -> VdcResult<T> {
  serde_json::from_value(params.clone())
    .map_err(|e| VdcApiError::InvalidParameter(e.to_string()).into())
}

/// Extract the mandatory `dSID` parameter every addressed message carries.
pub fn parse_dsid(params: &Value) -> VdcResult<crate::ident::DsUid> {
  let s = params
    .get("dSID")
    .and_then(Value::as_str)
    .ok_or_else(|| VdcError::from(VdcApiError::InvalidParameter("missing dSID".into())))?;
  s.parse()
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::ident::DsUid;
  use crate::message::{HelloParams, RpcId, VDC_API_VERSION};

  #[test]
  fn test_request_round_trip() {
    let params = serde_json::to_value(HelloParams::new(
      VDC_API_VERSION,
      DsUid::classic(0x000001, 0x14D9),
    ))
    .expect("serializes");
    let req = RpcRequest::new("hello", params, Some(RpcId::Number(1)));
    let line = to_line(&req).expect("serializes");
    match parse_line(&line).expect("parses") {
      IncomingMessage::Request(parsed) => {
        assert_eq!(parsed.method(), "hello");
        assert!(!parsed.is_notification());
        let hello: HelloParams = parse_params(parsed.params()).expect("typed params");
        assert_eq!(hello.api_version(), VDC_API_VERSION);
      }
      other => panic!("expected request, got {other:?}"),
    }
  }

  #[test]
  fn test_notification_has_no_id() {
    let line = r#"{"jsonrpc":"2.0","method":"callScene","params":{"dSID":"3504175FE0000010000014D9","scene":5}}"#;
    match parse_line(line).expect("parses") {
      IncomingMessage::Request(req) => {
        assert!(req.is_notification());
        assert_eq!(
          parse_dsid(req.params()).expect("dsid").to_string(),
          "3504175FE0000010000014D9"
        );
      }
      other => panic!("expected request, got {other:?}"),
    }
  }

  #[test]
  fn test_response_parse() {
    let line = r#"{"jsonrpc":"2.0","result":{},"id":"a1"}"#;
    match parse_line(line).expect("parses") {
      IncomingMessage::Response(resp) => {
        assert!(!resp.is_error());
        assert_eq!(*resp.id(), RpcId::String("a1".into()));
      }
      other => panic!("expected response, got {other:?}"),
    }
  }

  #[test]
  fn test_garbage_rejected() {
    assert!(parse_line("not json at all").is_err());
    assert!(parse_line(r#"{"jsonrpc":"1.0","method":"x"}"#).is_err());
    assert!(parse_line(r#"{"jsonrpc":"2.0"}"#).is_err());
  }
}
