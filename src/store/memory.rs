use anyhow::Result;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::error::StagingError;
use crate::model::{
    Branch, ChangeAction, Id, NewBranch, NewStagedChange, ObjectKey, ObjectPermission,
    ObjectRecord, StagedChange, TypeRegistry, TypeTag, UserContext,
};
use crate::store::traits::{
    BranchStore, ObjectStore, PermissionStore, StagedChangeStore, Store,
};

#[derive(Debug, Default)]
struct MemoryState {
    branches: HashMap<String, Branch>,
    staged: Vec<StagedChange>,
    next_staged_id: i64,
    objects: HashMap<ObjectKey, ObjectRecord>,
    permissions: HashMap<Id, ObjectPermission>,
}

/// In-memory store used by the test suite and by embedders that do not need
/// durability. A single `RwLock` over the whole state stands in for the
/// transaction isolation a real database provides.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl BranchStore for MemoryStore {
    async fn get_branch(&self, name: &str) -> Result<Option<Branch>> {
        Ok(self.state.read().branches.get(name).cloned())
    }

    async fn list_branches(&self) -> Result<Vec<Branch>> {
        let mut branches: Vec<Branch> = self.state.read().branches.values().cloned().collect();
        branches.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(branches)
    }

    async fn create_branch(&self, branch: NewBranch) -> Result<Branch> {
        let mut state = self.state.write();
        if state.branches.contains_key(&branch.name) {
            return Err(StagingError::BranchExists(branch.name).into());
        }
        let branch = branch.into_branch();
        state.branches.insert(branch.name.clone(), branch.clone());
        Ok(branch)
    }

    async fn delete_branch(&self, name: &str) -> Result<bool> {
        let mut state = self.state.write();
        let removed = state.branches.remove(name).is_some();
        if removed {
            state.staged.retain(|c| c.branch != name);
        }
        Ok(removed)
    }
}

#[async_trait::async_trait]
impl StagedChangeStore for MemoryStore {
    async fn list_staged_for_branch(&self, branch: &str) -> Result<Vec<StagedChange>> {
        // `staged` is kept in id order, so filtering preserves creation order
        Ok(self
            .state
            .read()
            .staged
            .iter()
            .filter(|c| c.branch == branch)
            .cloned()
            .collect())
    }

    async fn append_staged(
        &self,
        branch: &str,
        changes: Vec<NewStagedChange>,
    ) -> Result<Vec<StagedChange>> {
        let mut state = self.state.write();
        if !state.branches.contains_key(branch) {
            return Err(StagingError::BranchNotFound(branch.to_string()).into());
        }

        let mut created = Vec::with_capacity(changes.len());
        for change in changes {
            state.next_staged_id += 1;
            let staged = StagedChange {
                id: state.next_staged_id,
                branch: branch.to_string(),
                action: change.action,
                object_type: change.object_type,
                object_id: change.object_id,
                data: change.data,
                created_at: Utc::now(),
            };
            state.staged.push(staged.clone());
            created.push(staged);
        }
        Ok(created)
    }

    async fn clear_staged_for_branch(&self, branch: &str) -> Result<u64> {
        let mut state = self.state.write();
        let before = state.staged.len();
        state.staged.retain(|c| c.branch != branch);
        Ok((before - state.staged.len()) as u64)
    }

    async fn count_staged_for_branch(&self, branch: &str) -> Result<u64> {
        Ok(self
            .state
            .read()
            .staged
            .iter()
            .filter(|c| c.branch == branch)
            .count() as u64)
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    async fn get_object(&self, key: &ObjectKey) -> Result<Option<ObjectRecord>> {
        Ok(self.state.read().objects.get(key).cloned())
    }

    async fn list_objects_by_type(&self, tag: &TypeTag) -> Result<Vec<ObjectRecord>> {
        let mut records: Vec<ObjectRecord> = self
            .state
            .read()
            .objects
            .values()
            .filter(|r| &r.object_type == tag)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    async fn upsert_object(&self, record: ObjectRecord) -> Result<()> {
        self.state.write().objects.insert(record.key(), record);
        Ok(())
    }

    async fn delete_object(&self, key: &ObjectKey) -> Result<bool> {
        Ok(self.state.write().objects.remove(key).is_some())
    }

    async fn apply_staged(&self, registry: &TypeRegistry, branch: &str) -> Result<u64> {
        let mut state = self.state.write();

        // Apply into a scratch copy so a failure partway leaves the live
        // objects exactly as they were and every staged row in place.
        let mut objects = state.objects.clone();
        let changes: Vec<&StagedChange> =
            state.staged.iter().filter(|c| c.branch == branch).collect();
        let applied = changes.len() as u64;

        for change in &changes {
            match change.action {
                ChangeAction::Create | ChangeAction::Update => {
                    if let Some(record) = change.reconstruct(registry)? {
                        objects.insert(record.key(), record);
                    }
                }
                ChangeAction::Delete => {
                    let key = change
                        .key()
                        .ok_or(StagingError::MissingObjectId(change.id))?;
                    // Already-absent objects are tolerated: deletes are idempotent
                    objects.remove(&key);
                }
            }
        }

        state.objects = objects;
        state.staged.retain(|c| c.branch != branch);
        Ok(applied)
    }
}

#[async_trait::async_trait]
impl PermissionStore for MemoryStore {
    async fn get_permission(&self, id: &Id) -> Result<Option<ObjectPermission>> {
        Ok(self.state.read().permissions.get(id).cloned())
    }

    async fn list_permissions(&self) -> Result<Vec<ObjectPermission>> {
        let mut permissions: Vec<ObjectPermission> =
            self.state.read().permissions.values().cloned().collect();
        permissions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(permissions)
    }

    async fn upsert_permission(&self, permission: ObjectPermission) -> Result<()> {
        self.state
            .write()
            .permissions
            .insert(permission.id.clone(), permission);
        Ok(())
    }

    async fn delete_permission(&self, id: &Id) -> Result<bool> {
        Ok(self.state.write().permissions.remove(id).is_some())
    }

    async fn list_permissions_for_user(&self, user: &UserContext) -> Result<Vec<ObjectPermission>> {
        let assigned = |p: &ObjectPermission| {
            p.users.contains(&user.username) || p.groups.iter().any(|g| user.groups.contains(g))
        };
        let mut permissions: Vec<ObjectPermission> = self
            .state
            .read()
            .permissions
            .values()
            .filter(|p| p.enabled && assigned(p))
            .cloned()
            .collect();
        permissions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(permissions)
    }
}

impl Store for MemoryStore {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ObjectTypeDef, Snapshot};
    use serde_json::json;

    fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        registry.register(ObjectTypeDef::new(
            TypeTag::new("dcim", "site"),
            "site",
            &["name", "status"],
        ));
        registry
    }

    fn snapshot(fields: &[(&str, serde_json::Value)]) -> Snapshot {
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn create_branch_rejects_duplicates() {
        let store = MemoryStore::new();
        store.create_branch(NewBranch::named("a")).await.unwrap();
        assert!(store.create_branch(NewBranch::named("a")).await.is_err());
    }

    #[tokio::test]
    async fn delete_branch_cascades_staged_changes() {
        let store = MemoryStore::new();
        store.create_branch(NewBranch::named("a")).await.unwrap();
        store
            .append_staged(
                "a",
                vec![NewStagedChange {
                    action: ChangeAction::Create,
                    object_type: TypeTag::new("dcim", "site"),
                    object_id: Some("1".to_string()),
                    data: Some(snapshot(&[("name", json!("HQ"))])),
                }],
            )
            .await
            .unwrap();
        assert_eq!(store.count_staged_for_branch("a").await.unwrap(), 1);

        assert!(store.delete_branch("a").await.unwrap());
        assert_eq!(store.count_staged_for_branch("a").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn append_staged_assigns_increasing_ids() {
        let store = MemoryStore::new();
        store.create_branch(NewBranch::named("a")).await.unwrap();

        let make = |id: &str| NewStagedChange {
            action: ChangeAction::Create,
            object_type: TypeTag::new("dcim", "site"),
            object_id: Some(id.to_string()),
            data: Some(Snapshot::new()),
        };
        let first = store.append_staged("a", vec![make("1"), make("2")]).await.unwrap();
        let second = store.append_staged("a", vec![make("3")]).await.unwrap();

        assert!(first[0].id < first[1].id);
        assert!(first[1].id < second[0].id);

        let listed = store.list_staged_for_branch("a").await.unwrap();
        let ids: Vec<i64> = listed.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![first[0].id, first[1].id, second[0].id]);
    }

    #[tokio::test]
    async fn append_staged_requires_branch() {
        let store = MemoryStore::new();
        assert!(store.append_staged("missing", vec![]).await.is_err());
    }

    #[tokio::test]
    async fn apply_staged_failure_leaves_state_untouched() {
        let store = MemoryStore::new();
        let registry = registry();
        store.create_branch(NewBranch::named("a")).await.unwrap();
        store
            .append_staged(
                "a",
                vec![
                    NewStagedChange {
                        action: ChangeAction::Create,
                        object_type: TypeTag::new("dcim", "site"),
                        object_id: Some("1".to_string()),
                        data: Some(snapshot(&[("name", json!("HQ"))])),
                    },
                    // Undeclared field makes this snapshot fail to reconstruct
                    NewStagedChange {
                        action: ChangeAction::Create,
                        object_type: TypeTag::new("dcim", "site"),
                        object_id: Some("2".to_string()),
                        data: Some(snapshot(&[("asn", json!(65000))])),
                    },
                ],
            )
            .await
            .unwrap();

        assert!(store.apply_staged(&registry, "a").await.is_err());
        let key = ObjectKey::new(TypeTag::new("dcim", "site"), "1");
        assert!(store.get_object(&key).await.unwrap().is_none());
        assert_eq!(store.count_staged_for_branch("a").await.unwrap(), 2);
    }
}
