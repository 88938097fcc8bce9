use serde::{Deserialize, Serialize};

use crate::model::{ConstraintExpr, Id, TypeTag};

/// Actions a permission may grant. Stored as plain strings so custom actions
/// survive round-trips, with the four standard ones as constants.
pub const ACTION_VIEW: &str = "view";
pub const ACTION_ADD: &str = "add";
pub const ACTION_CHANGE: &str = "change";
pub const ACTION_DELETE: &str = "delete";

/// A declarative grant of one or more actions on one or more object types to
/// a set of users and/or groups, optionally limited by constraint
/// expressions.
///
/// A permission with no constraints grants unconditional access to all
/// objects of its applicable types for the listed actions. Permissions are
/// consulted, never mutated, at evaluation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectPermission {
    pub id: Id,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub enabled: bool,
    pub object_types: Vec<TypeTag>,
    pub actions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<ConstraintSets>,
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl ObjectPermission {
    pub fn can_view(&self) -> bool {
        self.grants(ACTION_VIEW)
    }

    pub fn can_add(&self) -> bool {
        self.grants(ACTION_ADD)
    }

    pub fn can_change(&self) -> bool {
        self.grants(ACTION_CHANGE)
    }

    pub fn can_delete(&self) -> bool {
        self.grants(ACTION_DELETE)
    }

    pub fn grants(&self, action: &str) -> bool {
        self.actions.iter().any(|a| a == action)
    }

    pub fn applies_to(&self, tag: &TypeTag) -> bool {
        self.object_types.contains(tag)
    }

    /// Return all constraint sets as a list, even if only a single set is
    /// defined. A `None` entry grants model-level (unconditional) access.
    pub fn list_constraints(&self) -> Vec<Option<&ConstraintExpr>> {
        match &self.constraints {
            None => vec![None],
            Some(ConstraintSets::Single(expr)) => vec![Some(expr)],
            Some(ConstraintSets::Many(entries)) => {
                if entries.is_empty() {
                    vec![None]
                } else {
                    entries.iter().map(|e| e.as_ref()).collect()
                }
            }
        }
    }
}

impl std::fmt::Display for ObjectPermission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// A permission's constraints: either one expression or a list of
/// independent alternatives, any of which suffices. A null entry in the
/// list stands for "no constraint" and permits every object of the type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConstraintSets {
    Many(Vec<Option<ConstraintExpr>>),
    Single(ConstraintExpr),
}
