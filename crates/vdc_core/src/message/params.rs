// vdcd-rs Source Code File - Virtual Device Controller for digitalSTROM.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dsdefs::SceneNo;
use crate::ident::DsUid;

/// `hello` request parameters.
#[derive(Debug, Clone, Serialize, Deserialize, Getters)]
#[getset(get = "pub")]
pub struct HelloParams {
  #[serde(rename = "APIVersion")]
  api_version: String,
  #[serde(rename = "dSID")]
  dsid: DsUid,
}

impl HelloParams {
  pub fn new(api_version: &str, dsid: DsUid) -> Self {
    Self {
      api_version: api_version.to_owned(),
      dsid,
    }
  }
}

/// `hello` result payload.
#[derive(Debug, Clone, Serialize, Deserialize, Getters)]
#[getset(get = "pub")]
pub struct HelloResult {
  #[serde(rename = "dSID")]
  dsid: DsUid,
  #[serde(rename = "allowDisconnect")]
  allow_disconnect: bool,
}

impl HelloResult {
  pub fn new(dsid: DsUid) -> Self {
    Self {
      dsid,
      allow_disconnect: false,
    }
  }
}

/// `bye` has no parameters beyond the envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ByeParams {}

/// Parameters shared by every addressed method/notification: the target
/// device (or host) identifier. Method specific parameters flatten on top.
#[derive(Debug, Clone, Serialize, Deserialize, Getters)]
#[getset(get = "pub")]
pub struct AddressedParams {
  #[serde(rename = "dSID")]
  dsid: DsUid,
}

impl AddressedParams {
  pub fn new(dsid: DsUid) -> Self {
    Self { dsid }
  }
}

/// `callScene` notification parameters.
#[derive(Debug, Clone, Serialize, Deserialize, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct CallSceneParams {
  scene: SceneNo,
  #[serde(default)]
  force: bool,
}

impl CallSceneParams {
  pub fn new(scene: SceneNo, force: bool) -> Self {
    Self { scene, force }
  }
}

/// Parameters of `saveScene`, `undoScene`, `setLocalPriority`, `callSceneMin`.
#[derive(Debug, Clone, Serialize, Deserialize, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct SceneParams {
  scene: SceneNo,
}

impl SceneParams {
  pub fn new(scene: SceneNo) -> Self {
    Self { scene }
  }
}

/// `setControlValue` parameters.
#[derive(Debug, Clone, Serialize, Deserialize, Getters)]
pub struct ControlValueParams {
  #[getset(get = "pub")]
  name: String,
  value: f64,
}

impl ControlValueParams {
  pub fn new(name: &str, value: f64) -> Self {
    Self {
      name: name.to_owned(),
      value,
    }
  }

  pub fn value(&self) -> f64 {
    self.value
  }
}

/// `getProperty` parameters. `name` may be a dotted path and may use the
/// wildcards `"*"` (all) and `"^"` (default property).
#[derive(Debug, Clone, Serialize, Deserialize, Getters)]
#[getset(get = "pub")]
pub struct GetPropertyParams {
  name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  index: Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  count: Option<i64>,
}

impl GetPropertyParams {
  pub fn new(name: &str, index: Option<i64>, count: Option<i64>) -> Self {
    Self {
      name: name.to_owned(),
      index,
      count,
    }
  }
}

/// `setProperty` parameters.
#[derive(Debug, Clone, Serialize, Deserialize, Getters)]
#[getset(get = "pub")]
pub struct SetPropertyParams {
  name: String,
  value: Value,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  index: Option<i64>,
}

impl SetPropertyParams {
  pub fn new(name: &str, value: Value, index: Option<i64>) -> Self {
    Self {
      name: name.to_owned(),
      value,
      index,
    }
  }
}
