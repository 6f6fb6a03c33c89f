//! Records and the raw resource data they are built from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::warn;

use crate::schema::Schema;

/// Reference to another resource by id and type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceIdentifier {
  pub id: String,
  #[serde(rename = "type")]
  pub resource_type: String,
}

/// Resource linkage of a relationship: empty, to-one, or to-many.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Linkage {
  Many(Vec<ResourceIdentifier>),
  One(Option<ResourceIdentifier>),
}

impl Default for Linkage {
  fn default() -> Self {
    Linkage::One(None)
  }
}

/// A relationship object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
  #[serde(default)]
  pub data: Linkage,
}

/// Raw resource object as delivered by a data source.
///
/// `id` is optional here because sources are not trusted to provide one;
/// the cache rejects data without it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceData {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
  pub resource_type: Option<String>,
  #[serde(default)]
  pub attributes: Map<String, Value>,
  #[serde(default)]
  pub relationships: BTreeMap<String, Relationship>,
}

impl ResourceData {
  /// Resource data with an id and no attributes.
  pub fn with_id(id: impl Into<String>) -> Self {
    Self {
      id: Some(id.into()),
      ..Self::default()
    }
  }

  /// Set an attribute value.
  pub fn attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
    self.attributes.insert(name.into(), value.into());
    self
  }

  /// Set a relationship linkage.
  pub fn relationship(mut self, name: impl Into<String>, data: Linkage) -> Self {
    self.relationships.insert(name.into(), Relationship { data });
    self
  }
}

/// Serialized form of a single record inside a cache snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordJson {
  pub data: ResourceData,
  #[serde(default)]
  pub updated_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub is_new: bool,
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub is_placeholder: bool,
}

/// A single typed resource instance tracked by a cache.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
  id: String,
  resource_type: String,
  attributes: Map<String, Value>,
  relationships: BTreeMap<String, Relationship>,
  is_new: bool,
  is_placeholder: bool,
  updated_at: Option<DateTime<Utc>>,
}

impl Record {
  /// Build a record of `schema`'s type from raw data.
  ///
  /// Attributes are conformed to the schema. A `type` in `data` that
  /// disagrees with the schema is ignored.
  pub fn new(
    id: impl Into<String>,
    schema: &Schema,
    data: ResourceData,
    is_new: bool,
    is_placeholder: bool,
  ) -> Self {
    let id = id.into();
    if let Some(ref kind) = data.resource_type {
      if kind != &schema.resource_type {
        warn!(id = %id, expected = %schema.resource_type, got = %kind, "Ignoring foreign resource type");
      }
    }

    Self {
      resource_type: schema.resource_type.clone(),
      attributes: schema.conform(data.attributes),
      relationships: data.relationships,
      is_new,
      is_placeholder,
      updated_at: if is_placeholder { None } else { Some(Utc::now()) },
      id,
    }
  }

  /// Placeholder for an id whose data has not arrived yet.
  pub fn placeholder(id: impl Into<String>, schema: &Schema) -> Self {
    Self::new(id, schema, ResourceData::default(), true, true)
  }

  /// Merge new data into this record in place.
  ///
  /// Attributes and relationships present in `data` overwrite existing ones;
  /// everything else is kept. The record counts as confirmed afterwards.
  pub fn update(&mut self, schema: &Schema, data: ResourceData) {
    self.attributes.extend(schema.conform(data.attributes));
    self.relationships.extend(data.relationships);
    self.is_new = false;
    self.is_placeholder = false;
    self.updated_at = Some(Utc::now());
  }

  /// Put back the sync state a snapshot recorded for this record.
  pub(crate) fn restore_state(
    &mut self,
    updated_at: Option<DateTime<Utc>>,
    is_new: bool,
    is_placeholder: bool,
  ) {
    self.updated_at = updated_at;
    self.is_new = is_new;
    self.is_placeholder = is_placeholder;
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn resource_type(&self) -> &str {
    &self.resource_type
  }

  pub fn attributes(&self) -> &Map<String, Value> {
    &self.attributes
  }

  pub fn attribute(&self, name: &str) -> Option<&Value> {
    self.attributes.get(name)
  }

  pub fn relationships(&self) -> &BTreeMap<String, Relationship> {
    &self.relationships
  }

  /// Created client-side and not yet confirmed by a source.
  pub fn is_new(&self) -> bool {
    self.is_new
  }

  /// Synthesized on first reference, no data populated.
  pub fn is_placeholder(&self) -> bool {
    self.is_placeholder
  }

  /// When this record last received data.
  pub fn updated_at(&self) -> Option<DateTime<Utc>> {
    self.updated_at
  }

  /// Human readable label: the schema's display attribute, or the id.
  pub fn label(&self, schema: &Schema) -> String {
    schema
      .display
      .as_deref()
      .and_then(|name| self.attributes.get(name))
      .and_then(|value| match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
      })
      .unwrap_or_else(|| self.id.clone())
  }

  /// The record as a resource object.
  pub fn to_resource(&self) -> ResourceData {
    ResourceData {
      id: Some(self.id.clone()),
      resource_type: Some(self.resource_type.clone()),
      attributes: self.attributes.clone(),
      relationships: self.relationships.clone(),
    }
  }

  /// Serialize this record for a cache snapshot.
  pub fn to_json(&self) -> RecordJson {
    RecordJson {
      data: self.to_resource(),
      updated_at: self.updated_at,
      is_new: self.is_new,
      is_placeholder: self.is_placeholder,
    }
  }
}

/// Shared handle to a cached record.
///
/// Handles are cheap to clone and all clones observe in-place updates, so a
/// handle obtained before data arrives keeps reflecting the record.
#[derive(Debug, Clone)]
pub struct RecordHandle(Arc<RwLock<Record>>);

impl RecordHandle {
  pub fn new(record: Record) -> Self {
    Self(Arc::new(RwLock::new(record)))
  }

  pub fn read(&self) -> RwLockReadGuard<'_, Record> {
    self.0.read().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn write(&self) -> RwLockWriteGuard<'_, Record> {
    self.0.write().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn id(&self) -> String {
    self.read().id.clone()
  }

  /// Whether both handles refer to the same record instance.
  pub fn ptr_eq(&self, other: &RecordHandle) -> bool {
    Arc::ptr_eq(&self.0, &other.0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::schema::AttributeType;
  use serde_json::json;

  fn jobs() -> Schema {
    Schema::new("jobs")
      .with_attribute("name", AttributeType::String)
      .with_attribute("salary", AttributeType::Number)
      .with_display("name")
  }

  #[test]
  fn test_placeholder_has_no_attributes() {
    let record = Record::placeholder("u1", &jobs());
    assert!(record.is_new());
    assert!(record.is_placeholder());
    assert!(record.attributes().is_empty());
    assert_eq!(record.resource_type(), "jobs");
    assert_eq!(record.updated_at(), None);
  }

  #[test]
  fn test_update_merges_and_confirms() {
    let schema = jobs();
    let mut record = Record::new(
      "u1",
      &schema,
      ResourceData::with_id("u1")
        .attribute("name", "Engineer")
        .attribute("salary", 90000),
      true,
      false,
    );

    record.update(&schema, ResourceData::with_id("u1").attribute("salary", 95000));

    assert_eq!(record.attribute("name"), Some(&json!("Engineer")));
    assert_eq!(record.attribute("salary"), Some(&json!(95000)));
    assert!(!record.is_new());
    assert!(record.updated_at().is_some());
  }

  #[test]
  fn test_update_replaces_relationships_by_name() {
    let schema = jobs();
    let robot = |id: &str| ResourceIdentifier {
      id: id.to_string(),
      resource_type: "robots".to_string(),
    };
    let mut record = Record::new(
      "u1",
      &schema,
      ResourceData::with_id("u1")
        .relationship("robots", Linkage::Many(vec![robot("r1"), robot("r2")]))
        .relationship("lead", Linkage::One(Some(robot("r1")))),
      false,
      false,
    );

    record.update(
      &schema,
      ResourceData::with_id("u1").relationship("lead", Linkage::One(None)),
    );

    assert_eq!(record.relationships()["lead"].data, Linkage::One(None));
    assert_eq!(
      record.relationships()["robots"].data,
      Linkage::Many(vec![robot("r1"), robot("r2")])
    );
  }

  #[test]
  fn test_to_json_carries_flags() {
    let schema = jobs();
    let placeholder = serde_json::to_value(Record::placeholder("u1", &schema).to_json()).unwrap();
    assert_eq!(placeholder["isPlaceholder"], json!(true));
    assert_eq!(placeholder["isNew"], json!(true));
    assert!(placeholder["updatedAt"].is_null());

    let confirmed = Record::new("u2", &schema, ResourceData::with_id("u2"), false, false);
    let value = serde_json::to_value(confirmed.to_json()).unwrap();
    assert!(value.get("isPlaceholder").is_none());
    assert!(value.get("isNew").is_none());
  }

  #[test]
  fn test_label_falls_back_to_id() {
    let schema = jobs();
    let mut record = Record::placeholder("u1", &schema);
    assert_eq!(record.label(&schema), "u1");

    record.update(&schema, ResourceData::with_id("u1").attribute("name", "Engineer"));
    assert_eq!(record.label(&schema), "Engineer");
  }

  #[test]
  fn test_foreign_type_is_ignored() {
    let data = ResourceData {
      resource_type: Some("robots".to_string()),
      ..ResourceData::with_id("u1")
    };
    let record = Record::new("u1", &jobs(), data, false, false);
    assert_eq!(record.resource_type(), "jobs");
  }

  #[test]
  fn test_relationship_linkage_shapes() {
    let data: ResourceData = serde_json::from_value(json!({
      "id": "u1",
      "relationships": {
        "robots": {"data": [{"id": "r1", "type": "robots"}]},
        "owner": {"data": {"id": "p1", "type": "people"}},
        "parent": {"data": null}
      }
    }))
    .unwrap();

    assert!(matches!(data.relationships["robots"].data, Linkage::Many(ref v) if v.len() == 1));
    assert!(matches!(data.relationships["owner"].data, Linkage::One(Some(_))));
    assert_eq!(data.relationships["parent"].data, Linkage::One(None));
  }

  #[test]
  fn test_to_json_shape() {
    let schema = jobs();
    let record = Record::new(
      "u1",
      &schema,
      ResourceData::with_id("u1").attribute("name", "Engineer"),
      false,
      false,
    );

    let value = serde_json::to_value(record.to_json()).unwrap();
    assert_eq!(value["data"]["id"], json!("u1"));
    assert_eq!(value["data"]["type"], json!("jobs"));
    assert_eq!(value["data"]["attributes"]["name"], json!("Engineer"));
    assert!(value["updatedAt"].is_string());
  }

  #[test]
  fn test_handles_share_updates() {
    let schema = jobs();
    let handle = RecordHandle::new(Record::placeholder("u1", &schema));
    let other = handle.clone();

    handle
      .write()
      .update(&schema, ResourceData::with_id("u1").attribute("name", "Engineer"));

    assert!(handle.ptr_eq(&other));
    assert_eq!(other.read().attribute("name"), Some(&json!("Engineer")));
  }
}
