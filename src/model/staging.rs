use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::StagingError;
use crate::model::{ChangeAction, Id, ObjectKey, ObjectRecord, Snapshot, TypeRegistry, TypeTag};

/// A durable record of one captured create/update/delete operation, pending
/// application to the live store.
///
/// The store-assigned `id` is monotonically increasing and doubles as the
/// creation-order key: merging a branch applies its staged changes in
/// ascending `id` order. Rows are immutable once written; they disappear when
/// the branch is merged or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedChange {
    pub id: i64,
    pub branch: String,
    pub action: ChangeAction,
    pub object_type: TypeTag,
    pub object_id: Option<Id>,
    pub data: Option<Snapshot>,
    pub created_at: DateTime<Utc>,
}

impl StagedChange {
    pub fn key(&self) -> Option<ObjectKey> {
        self.object_id
            .as_ref()
            .map(|id| ObjectKey::new(self.object_type.clone(), id.clone()))
    }

    /// Rebuild the target object for a create/update action. Returns `None`
    /// for deletes, which carry no snapshot.
    pub fn reconstruct(&self, registry: &TypeRegistry) -> Result<Option<ObjectRecord>, StagingError> {
        match self.action {
            ChangeAction::Create | ChangeAction::Update => {
                let data = self.data.as_ref().ok_or_else(|| StagingError::InvalidSnapshot {
                    tag: self.object_type.clone(),
                    id: self.object_id.clone().unwrap_or_default(),
                    reason: "missing snapshot".to_string(),
                })?;
                let record = registry.reconstruct(&self.object_type, self.object_id.as_ref(), data)?;
                Ok(Some(record))
            }
            ChangeAction::Delete => Ok(None),
        }
    }
}

impl fmt::Display for StagedChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({})",
            self.action,
            self.object_type,
            self.object_id.as_deref().unwrap_or("-"),
        )
    }
}

/// A staged change captured in memory but not yet persisted; the store
/// assigns `id` and `created_at` when the checkout queue is flushed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStagedChange {
    pub action: ChangeAction,
    pub object_type: TypeTag,
    pub object_id: Option<Id>,
    pub data: Option<Snapshot>,
}
