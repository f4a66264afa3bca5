//! Field accessor capability.
//!
//! The engine never inspects target types at runtime. The host supplies one
//! `FieldAccessor` per versioned type, binding abstract field names to
//! concrete getters and setters. `MapObject`/`MapAccessor` is a generic
//! map-backed target usable by hosts and the test suite.

use crate::error::{Result, VersionError};
use crate::value::{ObjectId, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Statically typed replacement for reflection-based field binding.
///
/// Field names may be dotted (`"loc.city"`) to address a sub-property; the
/// accessor decides how such paths map onto the target.
pub trait FieldAccessor<T>: Send + Sync {
    /// Type name carried in the wire representation, used to bootstrap
    /// remote replicas
    fn type_name(&self) -> &str;

    /// The versionable top-level fields of the target type
    fn fields(&self) -> &[String];

    /// Read a field; `Value::Null` for an unset field
    fn get(&self, target: &T, field: &str) -> Result<Value>;

    /// Write a field; `Value::Null` clears it
    fn set(&self, target: &mut T, field: &str, value: Value) -> Result<()>;

    /// Instantiate a default target carrying the given global identity
    /// (remote-replica bootstrap)
    fn create_default(&self, id: ObjectId) -> T;

    /// The target's stable global identity
    fn global_id(&self, target: &T) -> ObjectId;
}

/// Map-backed versioned object. Sub-properties are stored flat under their
/// dotted path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapObject {
    pub id: ObjectId,
    pub values: BTreeMap<String, Value>,
}

impl MapObject {
    pub fn new(id: ObjectId) -> Self {
        Self {
            id,
            values: BTreeMap::new(),
        }
    }

    pub fn get(&self, field: &str) -> Value {
        self.values.get(field).cloned().unwrap_or(Value::Null)
    }
}

/// Accessor for `MapObject` targets with a configured field list
#[derive(Debug, Clone)]
pub struct MapAccessor {
    type_name: String,
    fields: Vec<String>,
}

impl MapAccessor {
    pub fn new(type_name: &str, fields: &[&str]) -> Self {
        Self {
            type_name: type_name.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    fn check_root(&self, field: &str) -> Result<()> {
        let root = field.split_once('.').map_or(field, |(root, _)| root);
        if self.fields.iter().any(|f| f == root) {
            Ok(())
        } else {
            Err(VersionError::UnknownField(field.to_string()))
        }
    }
}

impl FieldAccessor<MapObject> for MapAccessor {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn get(&self, target: &MapObject, field: &str) -> Result<Value> {
        self.check_root(field)?;
        Ok(target.get(field))
    }

    fn set(&self, target: &mut MapObject, field: &str, value: Value) -> Result<()> {
        self.check_root(field)?;
        if value.is_null() {
            target.values.remove(field);
        } else {
            target.values.insert(field.to_string(), value);
        }
        Ok(())
    }

    fn create_default(&self, id: ObjectId) -> MapObject {
        MapObject::new(id)
    }

    fn global_id(&self, target: &MapObject) -> ObjectId {
        target.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_accessor_get_set() {
        let accessor = MapAccessor::new("image", &["title", "loc"]);
        let mut obj = MapObject::new(ObjectId::generate());

        assert_eq!(accessor.get(&obj, "title").unwrap(), Value::Null);
        accessor.set(&mut obj, "title", "sunset".into()).unwrap();
        assert_eq!(accessor.get(&obj, "title").unwrap(), Value::Text("sunset".into()));
    }

    #[test]
    fn test_map_accessor_sub_property() {
        let accessor = MapAccessor::new("image", &["loc"]);
        let mut obj = MapObject::new(ObjectId::generate());
        accessor.set(&mut obj, "loc.city", "berlin".into()).unwrap();
        assert_eq!(
            accessor.get(&obj, "loc.city").unwrap(),
            Value::Text("berlin".into())
        );
    }

    #[test]
    fn test_map_accessor_unknown_field() {
        let accessor = MapAccessor::new("image", &["title"]);
        let obj = MapObject::new(ObjectId::generate());
        assert!(matches!(
            accessor.get(&obj, "bogus"),
            Err(VersionError::UnknownField(_))
        ));
        assert!(matches!(
            accessor.get(&obj, "bogus.sub"),
            Err(VersionError::UnknownField(_))
        ));
    }

    #[test]
    fn test_map_accessor_null_clears() {
        let accessor = MapAccessor::new("image", &["title"]);
        let mut obj = MapObject::new(ObjectId::generate());
        accessor.set(&mut obj, "title", Value::Int(1)).unwrap();
        accessor.set(&mut obj, "title", Value::Null).unwrap();
        assert!(obj.values.is_empty());
    }
}
