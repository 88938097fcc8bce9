use std::collections::HashMap;

use crate::error::StagingError;
use crate::model::{generate_id, Id, ObjectRecord, Snapshot, TypeTag};

/// Declares one object type the engines may stage, merge, and restrict.
///
/// The declared field names are the type's queryable attributes: snapshots
/// reconstructed at merge time may only carry declared fields, and permission
/// constraint paths must start at a declared field.
#[derive(Debug, Clone)]
pub struct ObjectTypeDef {
    pub tag: TypeTag,
    pub display_name: String,
    pub fields: Vec<String>,
}

impl ObjectTypeDef {
    pub fn new(tag: TypeTag, display_name: &str, fields: &[&str]) -> Self {
        Self {
            tag,
            display_name: display_name.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f == name)
    }
}

/// Explicit registry mapping type tags to their definitions. Callers build
/// one at startup; the engines never discover types by reflection.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: HashMap<TypeTag, ObjectTypeDef>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, def: ObjectTypeDef) {
        self.types.insert(def.tag.clone(), def);
    }

    pub fn contains(&self, tag: &TypeTag) -> bool {
        self.types.contains_key(tag)
    }

    pub fn get(&self, tag: &TypeTag) -> Result<&ObjectTypeDef, StagingError> {
        self.types
            .get(tag)
            .ok_or_else(|| StagingError::UnknownType(tag.clone()))
    }

    /// Rebuild a live object from a staged snapshot, keeping the original
    /// object id when one was recorded. Undeclared field names in the
    /// snapshot are rejected; a stale snapshot must not merge silently.
    pub fn reconstruct(
        &self,
        tag: &TypeTag,
        object_id: Option<&Id>,
        data: &Snapshot,
    ) -> Result<ObjectRecord, StagingError> {
        let def = self.get(tag)?;
        let id = object_id.cloned().unwrap_or_else(generate_id);

        for field in data.keys() {
            if !def.has_field(field) {
                return Err(StagingError::InvalidSnapshot {
                    tag: tag.clone(),
                    id,
                    reason: format!("undeclared field '{}'", field),
                });
            }
        }

        Ok(ObjectRecord::new(tag.clone(), id, data.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn site_registry() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        registry.register(ObjectTypeDef::new(
            TypeTag::new("dcim", "site"),
            "site",
            &["name", "status", "region"],
        ));
        registry
    }

    #[test]
    fn reconstruct_keeps_original_id() {
        let registry = site_registry();
        let mut data = Snapshot::new();
        data.insert("name".to_string(), json!("HQ"));

        let record = registry
            .reconstruct(&TypeTag::new("dcim", "site"), Some(&"5".to_string()), &data)
            .unwrap();
        assert_eq!(record.id, "5");
        assert_eq!(record.field("name"), Some(&json!("HQ")));
    }

    #[test]
    fn reconstruct_rejects_undeclared_field() {
        let registry = site_registry();
        let mut data = Snapshot::new();
        data.insert("asn".to_string(), json!(65000));

        let err = registry
            .reconstruct(&TypeTag::new("dcim", "site"), Some(&"5".to_string()), &data)
            .unwrap_err();
        assert!(matches!(err, StagingError::InvalidSnapshot { .. }));
    }

    #[test]
    fn reconstruct_rejects_unknown_type() {
        let registry = site_registry();
        let err = registry
            .reconstruct(&TypeTag::new("dcim", "rack"), None, &Snapshot::new())
            .unwrap_err();
        assert!(matches!(err, StagingError::UnknownType(_)));
    }

    #[test]
    fn type_tag_parse() {
        assert!(TypeTag::parse("dcim.site").is_ok());
        assert!(TypeTag::parse("site").is_err());
        assert!(TypeTag::parse("dcim.site.rack").is_err());
        assert!(TypeTag::parse(".site").is_err());
    }
}
