use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::StagingError;
use crate::model::Id;

/// A snapshot of an object's field values: field name -> JSON value.
pub type Snapshot = serde_json::Map<String, Value>;

/// Identifies an object type as an `<app>.<model>` pair, e.g. `dcim.site`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeTag(String);

impl TypeTag {
    pub fn new(app_label: &str, model_name: &str) -> Self {
        Self(format!("{}.{}", app_label, model_name))
    }

    /// Parse a tag from its `<app>.<model>` string form.
    pub fn parse(s: &str) -> Result<Self, StagingError> {
        match s.split_once('.') {
            Some((app, model)) if !app.is_empty() && !model.is_empty() && !model.contains('.') => {
                Ok(Self(s.to_string()))
            }
            _ => Err(StagingError::InvalidTypeTag(s.to_string())),
        }
    }

    pub fn app_label(&self) -> &str {
        self.0.split_once('.').map(|(app, _)| app).unwrap_or("")
    }

    pub fn model_name(&self) -> &str {
        self.0.split_once('.').map(|(_, model)| model).unwrap_or("")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable identity of an object instance: (type tag, object id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub object_type: TypeTag,
    pub object_id: Id,
}

impl ObjectKey {
    pub fn new(object_type: TypeTag, object_id: impl Into<Id>) -> Self {
        Self {
            object_type,
            object_id: object_id.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.object_type, self.object_id)
    }
}

/// A generic live object row: identity plus its field values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub object_type: TypeTag,
    pub id: Id,
    pub fields: Snapshot,
}

impl ObjectRecord {
    pub fn new(object_type: TypeTag, id: impl Into<Id>, fields: Snapshot) -> Self {
        Self {
            object_type,
            id: id.into(),
            fields,
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.object_type.clone(), self.id.clone())
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn set_field(&mut self, name: &str, value: Value) {
        self.fields.insert(name.to_string(), value);
    }
}
