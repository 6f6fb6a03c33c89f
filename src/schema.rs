//! Resource schema descriptors.
//!
//! A [`Schema`] describes one resource type: its name, how identifiers are
//! generated, which attributes and relationships records carry, and which
//! attribute is used as a human readable label. Schemas are plain data so
//! they can be declared in the config file.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;
use uuid::{Uuid, Version};

/// Identifier generation and validation strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdStrategy {
  /// Random version 4 UUIDs in hyphenated form
  #[default]
  Uuid4,
}

impl IdStrategy {
  /// Generate a fresh identifier for an optimistically created record.
  pub fn generate(&self) -> String {
    match self {
      Self::Uuid4 => Uuid::new_v4().to_string(),
    }
  }

  /// Check whether `id` is a well-formed identifier for this strategy.
  pub fn validate(&self, id: &str) -> bool {
    match self {
      // Only the hyphenated form is accepted; `Uuid::try_parse` alone also
      // takes simple and braced encodings.
      Self::Uuid4 => {
        id.len() == 36
          && Uuid::try_parse(id).is_ok_and(|uuid| uuid.get_version() == Some(Version::Random))
      }
    }
  }
}

/// Declared type of an attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
  String,
  Number,
  Boolean,
  /// ISO 8601 string
  Date,
  Object,
  Array,
  Any,
}

impl AttributeType {
  /// Whether a JSON value fits this type. `null` fits every type.
  pub fn matches(&self, value: &Value) -> bool {
    match (self, value) {
      (_, Value::Null) | (Self::Any, _) => true,
      (Self::String, Value::String(_)) => true,
      (Self::Number, Value::Number(_)) => true,
      (Self::Boolean, Value::Bool(_)) => true,
      (Self::Date, Value::String(s)) => chrono::DateTime::parse_from_rfc3339(s).is_ok(),
      (Self::Object, Value::Object(_)) => true,
      (Self::Array, Value::Array(_)) => true,
      _ => false,
    }
  }
}

/// Relationship cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Cardinality {
  HasOne,
  HasMany,
}

/// Declaration of a single relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipSchema {
  #[serde(rename = "type")]
  pub cardinality: Cardinality,
  /// Whether related resources are requested eagerly
  #[serde(default)]
  pub included: bool,
}

/// Static description of a resource type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
  #[serde(rename = "type")]
  pub resource_type: String,
  #[serde(default)]
  pub id: IdStrategy,
  #[serde(default)]
  pub attributes: BTreeMap<String, AttributeType>,
  #[serde(default)]
  pub relationships: BTreeMap<String, RelationshipSchema>,
  /// Attribute used as the record label, falling back to the id
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub display: Option<String>,
}

impl Schema {
  /// Create a schema with no declared attributes or relationships.
  pub fn new(resource_type: impl Into<String>) -> Self {
    Self {
      resource_type: resource_type.into(),
      id: IdStrategy::default(),
      attributes: BTreeMap::new(),
      relationships: BTreeMap::new(),
      display: None,
    }
  }

  /// Declare an attribute.
  pub fn with_attribute(mut self, name: impl Into<String>, kind: AttributeType) -> Self {
    self.attributes.insert(name.into(), kind);
    self
  }

  /// Declare a relationship.
  pub fn with_relationship(
    mut self,
    name: impl Into<String>,
    cardinality: Cardinality,
    included: bool,
  ) -> Self {
    self.relationships.insert(
      name.into(),
      RelationshipSchema {
        cardinality,
        included,
      },
    );
    self
  }

  /// Set the label attribute.
  pub fn with_display(mut self, attribute: impl Into<String>) -> Self {
    self.display = Some(attribute.into());
    self
  }

  /// Keep only attributes that are declared and whose values fit their type.
  ///
  /// A schema without declared attributes accepts everything.
  pub fn conform(&self, attributes: Map<String, Value>) -> Map<String, Value> {
    if self.attributes.is_empty() {
      return attributes;
    }

    attributes
      .into_iter()
      .filter(|(name, value)| match self.attributes.get(name) {
        Some(kind) if kind.matches(value) => true,
        Some(kind) => {
          warn!(
            resource_type = %self.resource_type,
            attribute = %name,
            expected = ?kind,
            "Dropping attribute with mismatched type"
          );
          false
        }
        None => {
          warn!(
            resource_type = %self.resource_type,
            attribute = %name,
            "Dropping undeclared attribute"
          );
          false
        }
      })
      .collect()
  }

  /// Names of relationships that should be requested eagerly.
  pub fn included_relationships(&self) -> impl Iterator<Item = &str> {
    self
      .relationships
      .iter()
      .filter(|(_, rel)| rel.included)
      .map(|(name, _)| name.as_str())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn jobs() -> Schema {
    Schema::new("jobs")
      .with_attribute("name", AttributeType::String)
      .with_attribute("salary", AttributeType::Number)
      .with_relationship("robots", Cardinality::HasMany, true)
      .with_display("name")
  }

  #[test]
  fn test_generated_ids_validate() {
    let id = IdStrategy::Uuid4.generate();
    assert!(IdStrategy::Uuid4.validate(&id));
  }

  #[test]
  fn test_validate_rejects_malformed_ids() {
    let strategy = IdStrategy::Uuid4;
    assert!(!strategy.validate("not-a-valid-id"));
    assert!(!strategy.validate(""));
    // v1 UUID
    assert!(!strategy.validate("6fa459ea-ee8a-11ca-95e7-0800200c9a66"));
    // simple (unhyphenated) encoding
    assert!(!strategy.validate(&Uuid::new_v4().simple().to_string()));
  }

  #[test]
  fn test_conform_drops_undeclared_and_mismatched() {
    let attributes = json!({"name": "Engineer", "salary": "lots", "color": "red"});
    let Value::Object(map) = attributes else {
      unreachable!()
    };

    let conformed = jobs().conform(map);
    assert_eq!(conformed.len(), 1);
    assert_eq!(conformed["name"], json!("Engineer"));
  }

  #[test]
  fn test_conform_accepts_null_values() {
    let Value::Object(map) = json!({"salary": null}) else {
      unreachable!()
    };
    assert_eq!(jobs().conform(map).len(), 1);
  }

  #[test]
  fn test_schema_without_attributes_accepts_everything() {
    let Value::Object(map) = json!({"anything": [1, 2]}) else {
      unreachable!()
    };
    assert_eq!(Schema::new("misc").conform(map).len(), 1);
  }

  #[test]
  fn test_date_attribute() {
    assert!(AttributeType::Date.matches(&json!("2024-05-01T10:00:00Z")));
    assert!(!AttributeType::Date.matches(&json!("yesterday")));
  }

  #[test]
  fn test_deserialize_from_yaml() {
    let yaml = r#"
type: jobs
id: uuid4
attributes:
  name: string
  salary: number
relationships:
  robots:
    type: hasMany
    included: true
display: name
"#;
    let schema: Schema = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(schema, jobs());
    assert_eq!(schema.included_relationships().collect::<Vec<_>>(), ["robots"]);
  }
}
