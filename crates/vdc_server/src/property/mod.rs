// vdcd-rs Source Code File - Virtual Device Controller for digitalSTROM.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Uniform hierarchical property access.
//!
//! Every addressable object (host, vdc, device, behaviour, scene) exposes
//! named properties through the same recursive accessor. Properties are
//! declared in const descriptor slices; containers only implement field
//! access and subcontainer lookup, the recursion and the wildcard rules
//! live here.
//!
//! Wildcards: `"*"` reads/writes all fields of a container, `"^"`
//! addresses the container's default (first) property, which is how
//! proxy properties living in another container are pierced.

use serde_json::{Map, Value};

use vdc_core::errors::VdcPropertyError;
use vdc_core::VdcResult;

/// Key bias per property group, so field handlers can dispatch by range.
pub const DESCRIPTION_KEY_OFFSET: u16 = 1000;
pub const SETTINGS_KEY_OFFSET: u16 = 2000;
pub const STATE_KEY_OFFSET: u16 = 3000;

/// Value type of a property field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
  Bool,
  Int8,
  Int16,
  Int32,
  Int64,
  Double,
  CString,
  String_,
  /// Nested container, read as an object.
  Object,
  /// Container whose default property stands in for this one.
  Proxy,
}

impl PropertyType {
  fn is_container(&self) -> bool {
    matches!(self, PropertyType::Object | PropertyType::Proxy)
  }

  /// Check that a JSON value is assignable to this field type.
  fn accepts(&self, value: &Value) -> bool {
    match self {
      PropertyType::Bool => value.is_boolean(),
      PropertyType::Int8 | PropertyType::Int16 | PropertyType::Int32 | PropertyType::Int64 => {
        value.is_i64() || value.is_u64()
      }
      PropertyType::Double => value.is_number(),
      PropertyType::CString | PropertyType::String_ => value.is_string(),
      PropertyType::Object | PropertyType::Proxy => value.is_object(),
    }
  }
}

/// One property declaration. Descriptor slices are const per container
/// kind; no runtime allocation is involved in property dispatch.
#[derive(Debug, Clone, Copy)]
pub struct PropertyDescriptor {
  pub name: &'static str,
  pub prop_type: PropertyType,
  pub is_array: bool,
  /// Field key, biased by the group offset.
  pub access_key: u16,
  /// Distinguishes the owning container level when descriptor slices of
  /// several levels are merged into one dispatch.
  pub owner_tag: u8,
}

impl PropertyDescriptor {
  pub const fn field(name: &'static str, prop_type: PropertyType, access_key: u16) -> Self {
    Self {
      name,
      prop_type,
      is_array: false,
      access_key,
      owner_tag: 0,
    }
  }

  pub const fn array(name: &'static str, prop_type: PropertyType, access_key: u16) -> Self {
    Self {
      name,
      prop_type,
      is_array: true,
      access_key,
      owner_tag: 0,
    }
  }
}

/// Index selector for array properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropIndex {
  /// Scalar access, or "the whole array".
  None,
  /// One element.
  At(usize),
  /// The array size instead of any element.
  Size,
  /// `count` elements starting at `start`; reading stops early at the
  /// first out-of-range element without raising an error.
  Range { start: usize, count: usize },
}

impl PropIndex {
  /// Map the upstream API's optional index/count pair onto a selector.
  /// `index == -1` requests the array size.
  pub fn from_api(index: Option<i64>, count: Option<i64>) -> Self {
    match (index, count) {
      (None, _) => PropIndex::None,
      (Some(-1), _) => PropIndex::Size,
      (Some(i), Some(c)) if c > 0 => PropIndex::Range {
        start: i.max(0) as usize,
        count: c as usize,
      },
      (Some(i), _) => PropIndex::At(i.max(0) as usize),
    }
  }
}

/// A node of the property tree.
pub trait PropertyContainer {
  /// The descriptors of this container, in declaration order. The first
  /// one is the default property addressed by `"^"`.
  fn descriptors(&self) -> &'static [PropertyDescriptor];

  /// Current element count of an array property.
  fn array_size(&self, _desc: &PropertyDescriptor) -> usize {
    0
  }

  /// Read one scalar field (`index` is the element for array fields).
  fn read_field(&self, desc: &PropertyDescriptor, index: usize) -> VdcResult<Value>;

  /// Write one scalar field. The default rejects everything; containers
  /// with writable fields override and dispatch by `access_key` range.
  fn write_field(&mut self, desc: &PropertyDescriptor, _index: usize, _value: &Value) -> VdcResult<()> {
    Err(VdcPropertyError::ReadOnly(desc.name.to_owned()).into())
  }

  /// Subcontainer lookup for object/proxy properties.
  fn container(&self, _desc: &PropertyDescriptor, _index: usize) -> Option<&dyn PropertyContainer> {
    None
  }

  fn container_mut(
    &mut self,
    _desc: &PropertyDescriptor,
    _index: usize,
  ) -> Option<&mut dyn PropertyContainer> {
    None
  }

  /// Called after a write that reached this container's descriptor, so
  /// owners can mark persistence dirty (scene tables use this).
  fn written_property(&mut self, _desc: &PropertyDescriptor, _index: usize) {}

  /// Hook for array elements that are synthesized on demand instead of
  /// living in a materialized subcontainer (scene tables). Returning
  /// Some short-circuits the standard element read.
  fn read_custom(&self, _desc: &PropertyDescriptor, _index: usize) -> Option<VdcResult<Value>> {
    None
  }

  /// Write-side counterpart of [Self::read_custom].
  fn write_custom(
    &mut self,
    _desc: &PropertyDescriptor,
    _index: PropIndex,
    _value: &Value,
  ) -> Option<VdcResult<()>> {
    None
  }

  // --- provided recursion -------------------------------------------------

  fn descriptor_by_name(&self, name: &str) -> VdcResult<&'static PropertyDescriptor> {
    self
      .descriptors()
      .iter()
      .find(|d| d.name == name)
      .ok_or_else(|| VdcPropertyError::UnknownName(name.to_owned()).into())
  }

  /// Read a property of this container by name (with wildcard support).
  fn read_property(&self, name: &str, index: PropIndex) -> VdcResult<Value> {
    match name {
      "*" => {
        let mut obj = Map::new();
        for desc in self.descriptors() {
          match self.read_descriptor(desc, PropIndex::None) {
            Ok(v) => {
              obj.insert(desc.name.to_owned(), v);
            }
            // array exhaustion and absent subcontainers are not errors on wildcard reads
            Err(e) if e.code() == 204 => {}
            Err(e) => return Err(e),
          }
        }
        Ok(Value::Object(obj))
      }
      "^" => {
        let desc = self
          .descriptors()
          .first()
          .ok_or_else(|| VdcPropertyError::UnknownName("^".to_owned()))?;
        self.read_descriptor(desc, index)
      }
      _ => {
        let desc = self.descriptor_by_name(name)?;
        self.read_descriptor(desc, index)
      }
    }
  }

  fn read_descriptor(&self, desc: &PropertyDescriptor, index: PropIndex) -> VdcResult<Value> {
    if desc.is_array {
      match index {
        PropIndex::Size => Ok(Value::from(self.array_size(desc))),
        PropIndex::At(i) => self.read_element(desc, i),
        PropIndex::Range { start, count } => self.read_range(desc, start, count),
        PropIndex::None => self.read_range(desc, 0, usize::MAX),
      }
    } else if desc.prop_type.is_container() {
      let sub = self
        .container(desc, 0)
        .ok_or_else(|| VdcPropertyError::UnknownName(desc.name.to_owned()))?;
      // proxy containers stand in with their default property
      sub.read_property(if desc.prop_type == PropertyType::Proxy { "^" } else { "*" }, PropIndex::None)
    } else {
      self.read_field(desc, 0)
    }
  }

  fn read_element(&self, desc: &PropertyDescriptor, index: usize) -> VdcResult<Value> {
    if let Some(result) = self.read_custom(desc, index) {
      return result;
    }
    if index >= self.array_size(desc) {
      return Err(VdcPropertyError::IndexOutOfRange(index).into());
    }
    if desc.prop_type.is_container() {
      let sub = self
        .container(desc, index)
        .ok_or(VdcPropertyError::IndexOutOfRange(index))?;
      sub.read_property(if desc.prop_type == PropertyType::Proxy { "^" } else { "*" }, PropIndex::None)
    } else {
      self.read_field(desc, index)
    }
  }

  /// Collect up to `count` elements; stopping at the first out-of-range
  /// element is normal array exhaustion, not a failure.
  fn read_range(&self, desc: &PropertyDescriptor, start: usize, count: usize) -> VdcResult<Value> {
    let mut elements = Vec::new();
    let mut i = start;
    while (i - start) < count {
      match self.read_element(desc, i) {
        Ok(v) => elements.push(v),
        Err(e) if e.code() == 204 => break,
        Err(e) => return Err(e),
      }
      i += 1;
    }
    Ok(Value::Array(elements))
  }

  /// Write a property of this container by name (with wildcard support).
  fn write_property(&mut self, name: &str, index: PropIndex, value: &Value) -> VdcResult<()> {
    match name {
      "*" => {
        let obj = value
          .as_object()
          .ok_or_else(|| VdcPropertyError::TypeMismatch("*".to_owned()))?;
        for (key, v) in obj {
          self.write_property(key, PropIndex::None, v)?;
        }
        Ok(())
      }
      "^" => {
        let desc = *self
          .descriptors()
          .first()
          .ok_or_else(|| VdcPropertyError::UnknownName("^".to_owned()))?;
        self.write_descriptor(&desc, index, value)
      }
      _ => {
        let desc = *self.descriptor_by_name(name)?;
        self.write_descriptor(&desc, index, value)
      }
    }
  }

  fn write_descriptor(
    &mut self,
    desc: &PropertyDescriptor,
    index: PropIndex,
    value: &Value,
  ) -> VdcResult<()> {
    if let Some(result) = self.write_custom(desc, index, value) {
      if result.is_ok() {
        self.written_property(desc, if let PropIndex::At(i) = index { i } else { 0 });
      }
      return result;
    }
    let element = match index {
      PropIndex::At(i) => i,
      PropIndex::None => 0,
      _ => return Err(VdcPropertyError::TypeMismatch(desc.name.to_owned()).into()),
    };
    if desc.is_array && element >= self.array_size(desc) {
      return Err(VdcPropertyError::IndexOutOfRange(element).into());
    }
    if desc.prop_type.is_container() {
      {
        let wildcard = if desc.prop_type == PropertyType::Proxy { "^" } else { "*" };
        let sub = self
          .container_mut(desc, element)
          .ok_or_else(|| VdcPropertyError::UnknownName(desc.name.to_owned()))?;
        sub.write_property(wildcard, PropIndex::None, value)?;
      }
      self.written_property(desc, element);
      Ok(())
    } else {
      if !desc.prop_type.accepts(value) {
        return Err(VdcPropertyError::TypeMismatch(desc.name.to_owned()).into());
      }
      self.write_field(desc, element, value)?;
      self.written_property(desc, element);
      Ok(())
    }
  }

  /// Resolve a dotted path ("buttons.0.mode") and read at the final node.
  /// Numeric segments index into array properties.
  fn read_path(&self, path: &str, index: PropIndex) -> VdcResult<Value> {
    match split_path(path) {
      None => self.read_property(path, index),
      Some((head, head_index, rest)) => {
        let desc = self.descriptor_by_name(head)?;
        let sub = self
          .container(desc, head_index)
          .ok_or_else(|| VdcPropertyError::UnknownName(head.to_owned()))?;
        if desc.is_array && head_index >= self.array_size(desc) {
          return Err(VdcPropertyError::IndexOutOfRange(head_index).into());
        }
        sub.read_path(rest, index)
      }
    }
  }

  /// Resolve a dotted path and write at the final node.
  fn write_path(&mut self, path: &str, index: PropIndex, value: &Value) -> VdcResult<()> {
    match split_path(path) {
      None => self.write_property(path, index, value),
      Some((head, head_index, rest)) => {
        let desc = *self.descriptor_by_name(head)?;
        if desc.is_array && head_index >= self.array_size(&desc) {
          return Err(VdcPropertyError::IndexOutOfRange(head_index).into());
        }
        {
          let sub = self
            .container_mut(&desc, head_index)
            .ok_or_else(|| VdcPropertyError::UnknownName(head.to_owned()))?;
          sub.write_path(rest, index, value)?;
        }
        self.written_property(&desc, head_index);
        Ok(())
      }
    }
  }
}

/// Split "head[.index].rest" off a dotted property path. Returns None
/// when the path is a single segment (handled by the container itself).
fn split_path(path: &str) -> Option<(&str, usize, &str)> {
  let (head, rest) = path.split_once('.')?;
  // numeric segment after an array name selects the element
  if let Some((idx_str, tail)) = rest.split_once('.') {
    if let Ok(i) = idx_str.parse::<usize>() {
      return Some((head, i, tail));
    }
  } else if let Ok(i) = rest.parse::<usize>() {
    return Some((head, i, "*"));
  }
  Some((head, 0, rest))
}

#[cfg(test)]
mod test {
  use super::*;

  struct Leaf {
    value: f64,
    flag: bool,
  }

  const LEAF_PROPS: [PropertyDescriptor; 2] = [
    PropertyDescriptor::field("value", PropertyType::Double, 0),
    PropertyDescriptor::field("flag", PropertyType::Bool, 1),
  ];

  impl PropertyContainer for Leaf {
    fn descriptors(&self) -> &'static [PropertyDescriptor] {
      &LEAF_PROPS
    }

    fn read_field(&self, desc: &PropertyDescriptor, _index: usize) -> VdcResult<Value> {
      match desc.access_key {
        0 => Ok(Value::from(self.value)),
        _ => Ok(Value::from(self.flag)),
      }
    }

    fn write_field(&mut self, desc: &PropertyDescriptor, _index: usize, value: &Value) -> VdcResult<()> {
      match desc.access_key {
        0 => self.value = value.as_f64().unwrap_or_default(),
        _ => self.flag = value.as_bool().unwrap_or_default(),
      }
      Ok(())
    }
  }

  struct Root {
    label: String,
    leaves: Vec<Leaf>,
    writes_seen: usize,
  }

  const ROOT_PROPS: [PropertyDescriptor; 3] = [
    PropertyDescriptor::field("label", PropertyType::String_, 0),
    PropertyDescriptor::array("leaves", PropertyType::Object, 1),
    PropertyDescriptor::field("shortcut", PropertyType::Proxy, 2),
  ];

  impl PropertyContainer for Root {
    fn descriptors(&self) -> &'static [PropertyDescriptor] {
      &ROOT_PROPS
    }

    fn array_size(&self, desc: &PropertyDescriptor) -> usize {
      if desc.access_key == 1 { self.leaves.len() } else { 0 }
    }

    fn read_field(&self, desc: &PropertyDescriptor, _index: usize) -> VdcResult<Value> {
      match desc.access_key {
        0 => Ok(Value::from(self.label.clone())),
        _ => Err(VdcPropertyError::UnknownName(desc.name.to_owned()).into()),
      }
    }

    fn write_field(&mut self, desc: &PropertyDescriptor, _index: usize, value: &Value) -> VdcResult<()> {
      match desc.access_key {
        0 => {
          self.label = value.as_str().unwrap_or_default().to_owned();
          Ok(())
        }
        _ => Err(VdcPropertyError::ReadOnly(desc.name.to_owned()).into()),
      }
    }

    fn container(&self, desc: &PropertyDescriptor, index: usize) -> Option<&dyn PropertyContainer> {
      match desc.access_key {
        1 => self.leaves.get(index).map(|l| l as &dyn PropertyContainer),
        2 => self.leaves.first().map(|l| l as &dyn PropertyContainer),
        _ => None,
      }
    }

    fn container_mut(
      &mut self,
      desc: &PropertyDescriptor,
      index: usize,
    ) -> Option<&mut dyn PropertyContainer> {
      match desc.access_key {
        1 => self.leaves.get_mut(index).map(|l| l as &mut dyn PropertyContainer),
        2 => self.leaves.first_mut().map(|l| l as &mut dyn PropertyContainer),
        _ => None,
      }
    }

    fn written_property(&mut self, _desc: &PropertyDescriptor, _index: usize) {
      self.writes_seen += 1;
    }
  }

  fn fixture() -> Root {
    Root {
      label: "test".into(),
      leaves: vec![
        Leaf { value: 1.0, flag: false },
        Leaf { value: 2.0, flag: true },
      ],
      writes_seen: 0,
    }
  }

  #[test]
  fn test_wildcard_read() {
    let root = fixture();
    let all = root.read_property("*", PropIndex::None).expect("reads");
    assert_eq!(all["label"], "test");
    assert_eq!(all["leaves"].as_array().expect("array").len(), 2);
    assert_eq!(all["leaves"][1]["value"], 2.0);
    // proxy pierced to the default (first) property of the first leaf
    assert_eq!(all["shortcut"], 1.0);
  }

  #[test]
  fn test_array_size_and_range() {
    let root = fixture();
    assert_eq!(
      root.read_property("leaves", PropIndex::Size).expect("size"),
      Value::from(2usize)
    );
    // over-long range read stops at array exhaustion without error
    let range = root
      .read_property("leaves", PropIndex::Range { start: 1, count: 10 })
      .expect("range");
    assert_eq!(range.as_array().expect("array").len(), 1);
  }

  #[test]
  fn test_unknown_name_501_and_range_204() {
    let root = fixture();
    let err = root.read_property("bogus", PropIndex::None).expect_err("must fail");
    assert_eq!(err.code(), 501);
    let err = root.read_property("leaves", PropIndex::At(5)).expect_err("must fail");
    assert_eq!(err.code(), 204);
  }

  #[test]
  fn test_write_path_and_notification() {
    let mut root = fixture();
    root
      .write_path("leaves.0.value", PropIndex::None, &Value::from(42.5))
      .expect("writes");
    assert_eq!(root.leaves[0].value, 42.5);
    assert_eq!(root.writes_seen, 1);
    // type mismatch is 415
    let err = root
      .write_path("leaves.0.flag", PropIndex::None, &Value::from(3))
      .expect_err("must fail");
    assert_eq!(err.code(), 415);
  }

  #[test]
  fn test_readonly_403() {
    let mut root = fixture();
    let err = root
      .write_property("shortcut", PropIndex::None, &Value::from("x"))
      .expect_err("must fail");
    // proxy write pierces to leaf default property "value", string is a mismatch
    assert_eq!(err.code(), 415);
    let err = root
      .write_property("leaves", PropIndex::At(9), &Value::from(1.0))
      .expect_err("must fail");
    assert_eq!(err.code(), 204);
  }

  #[test]
  fn test_wildcard_write() {
    let mut root = fixture();
    let patch = serde_json::json!({ "label": "renamed" });
    root.write_property("*", PropIndex::None, &patch).expect("writes");
    assert_eq!(root.label, "renamed");
  }
}
