// vdcd-rs Source Code File - Virtual Device Controller for digitalSTROM.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! vDC error structs/enums. Every fallible operation at the core boundary
//! returns a tagged result; exceptions/panics are not part of the model.

use displaydoc::Display;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Macro for implementing `From<ErrorType> for BoxFuture<'static, Result<T, VdcError>>`.
/// These implementations allow error types to be converted directly into ready futures.
macro_rules! impl_error_to_future {
  ($($error_type:ty),* $(,)?) => {
    $(
      impl<T> From<$error_type> for BoxFuture<'static, Result<T, VdcError>>
      where
        T: Send + 'static,
      {
        fn from(err: $error_type) -> BoxFuture<'static, Result<T, VdcError>> {
          VdcError::from(err).into()
        }
      }
    )*
  };
}

impl_error_to_future!(
  VdcApiError,
  VdcPropertyError,
  VdcDeviceError,
  VdcPersistError,
  VdcProtocolError,
);

impl<T> From<VdcError> for BoxFuture<'static, Result<T, VdcError>>
where
  T: Send + 'static,
{
  fn from(err: VdcError) -> BoxFuture<'static, Result<T, VdcError>> {
    Box::pin(futures::future::ready(Err(err)))
  }
}

/// Errors surfaced on the upstream vdSM API as error replies with a
/// numeric code. Codes follow the vDC API convention.
#[derive(Debug, Error, Display, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VdcApiError {
  /// Incompatible vDC API version - expected "1.0", got "{0}"
  IncompatibleApiVersion(String),
  /// this vDC already has an active session with vdSM {0}
  SessionBusy(String),
  /// no vDC session - cannot call method
  NoSession,
  /// unknown dSUID {0}
  UnknownAddressable(String),
  /// unknown method "{0}"
  UnknownMethod(String),
  /// invalid or missing parameter: {0}
  InvalidParameter(String),
  /// cannot remove {0} while connected
  RemovalRefused(String),
  /// general failure: {0}
  GeneralFailure(String),
}

impl VdcApiError {
  /// The numeric code sent in the JSON-RPC error object.
  pub fn code(&self) -> i32 {
    match self {
      VdcApiError::IncompatibleApiVersion(_) => 505,
      VdcApiError::SessionBusy(_) => 503,
      VdcApiError::NoSession => 401,
      VdcApiError::UnknownAddressable(_) => 404,
      VdcApiError::UnknownMethod(_) => 501,
      VdcApiError::InvalidParameter(_) => 400,
      VdcApiError::RemovalRefused(_) => 403,
      VdcApiError::GeneralFailure(_) => 500,
    }
  }
}

/// Property tree access errors. `IndexOutOfRange` is recoverable during
/// array range reads and only surfaces when a specific index was addressed.
#[derive(Debug, Error, Display, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VdcPropertyError {
  /// unknown property "{0}"
  UnknownName(String),
  /// property index {0} out of range
  IndexOutOfRange(usize),
  /// value type mismatch for property "{0}"
  TypeMismatch(String),
  /// property "{0}" is read-only
  ReadOnly(String),
}

impl VdcPropertyError {
  pub fn code(&self) -> i32 {
    match self {
      VdcPropertyError::UnknownName(_) => 501,
      VdcPropertyError::IndexOutOfRange(_) => 204,
      VdcPropertyError::TypeMismatch(_) => 415,
      VdcPropertyError::ReadOnly(_) => 403,
    }
  }
}

/// Device/hardware level errors. `MissingData` is non-fatal during DALI
/// collection; presence check failures are reported, not propagated.
#[derive(Debug, Error, Display, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VdcDeviceError {
  /// device {0} is not connected
  NotConnected(String),
  /// device {0} did not respond to presence check
  NotPresent(String),
  /// incomplete device info: {0}
  MissingData(String),
  /// device has no output
  NoOutput,
  /// no channel at index {0}
  InvalidChannel(usize),
  /// hardware error: {0}
  HardwareFailure(String),
}

/// Persistence errors from the SQLite parameter store.
#[derive(Debug, Error, Display, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VdcPersistError {
  /// database error: {0}
  DatabaseError(String),
  /// schema migration failed: {0}
  MigrationFailed(String),
}

/// Wire protocol errors (ESP3/DALI framing). These are swallowed at the
/// lowest layer - scanners self-resync - but the framing functions still
/// report them so callers can log.
#[derive(Debug, Error, Display, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VdcProtocolError {
  /// frame too short ({0} bytes)
  ShortFrame(usize),
  /// CRC mismatch (expected {expected:#04x}, got {actual:#04x})
  CrcMismatch { expected: u8, actual: u8 },
  /// invalid frame: {0}
  InvalidFrame(String),
  /// transport error: {0}
  Transport(String),
}

/// Aggregation enum for vDC error types.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VdcError {
  #[error(transparent)]
  VdcApiError(#[from] VdcApiError),
  #[error(transparent)]
  VdcPropertyError(#[from] VdcPropertyError),
  #[error(transparent)]
  VdcDeviceError(#[from] VdcDeviceError),
  #[error(transparent)]
  VdcPersistError(#[from] VdcPersistError),
  #[error(transparent)]
  VdcProtocolError(#[from] VdcProtocolError),
}

impl VdcError {
  /// The numeric code for the JSON-RPC error object. Non-API errors map
  /// to 500 unless a more specific property/API code applies.
  pub fn code(&self) -> i32 {
    match self {
      VdcError::VdcApiError(e) => e.code(),
      VdcError::VdcPropertyError(e) => e.code(),
      _ => 500,
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn test_api_error_codes() {
    assert_eq!(VdcApiError::NoSession.code(), 401);
    assert_eq!(VdcApiError::UnknownAddressable("X".into()).code(), 404);
    assert_eq!(VdcApiError::IncompatibleApiVersion("2.0".into()).code(), 505);
    assert_eq!(VdcApiError::SessionBusy("Y".into()).code(), 503);
    assert_eq!(VdcError::from(VdcPropertyError::IndexOutOfRange(7)).code(), 204);
  }

  #[test]
  fn test_error_messages_carry_context() {
    let err = VdcError::from(VdcApiError::UnknownMethod("frobnicate".into()));
    assert!(err.to_string().contains("frobnicate"));
  }
}
