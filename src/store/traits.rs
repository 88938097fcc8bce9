use anyhow::Result;

use crate::model::{
    Branch, Id, NewBranch, NewStagedChange, ObjectKey, ObjectPermission, ObjectRecord,
    StagedChange, TypeRegistry, TypeTag, UserContext,
};

#[async_trait::async_trait]
pub trait BranchStore: Send + Sync {
    async fn get_branch(&self, name: &str) -> Result<Option<Branch>>;
    async fn list_branches(&self) -> Result<Vec<Branch>>;
    async fn create_branch(&self, branch: NewBranch) -> Result<Branch>;
    /// Delete a branch and, with it, all of its staged changes
    async fn delete_branch(&self, name: &str) -> Result<bool>;
}

#[async_trait::async_trait]
pub trait StagedChangeStore: Send + Sync {
    /// Staged changes for a branch in creation (insertion) order
    async fn list_staged_for_branch(&self, branch: &str) -> Result<Vec<StagedChange>>;
    /// Persist a flushed checkout queue, assigning creation-order ids
    async fn append_staged(
        &self,
        branch: &str,
        changes: Vec<NewStagedChange>,
    ) -> Result<Vec<StagedChange>>;
    async fn clear_staged_for_branch(&self, branch: &str) -> Result<u64>;
    async fn count_staged_for_branch(&self, branch: &str) -> Result<u64>;
}

#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_object(&self, key: &ObjectKey) -> Result<Option<ObjectRecord>>;
    async fn list_objects_by_type(&self, tag: &TypeTag) -> Result<Vec<ObjectRecord>>;
    async fn upsert_object(&self, record: ObjectRecord) -> Result<()>;
    async fn delete_object(&self, key: &ObjectKey) -> Result<bool>;
    /// Apply a branch's staged changes to the live objects in creation order
    /// and clear them, all-or-nothing: if any single change fails to apply,
    /// no change is applied and every staged row remains for retry. Returns
    /// the number of changes applied.
    async fn apply_staged(&self, registry: &TypeRegistry, branch: &str) -> Result<u64>;
}

#[async_trait::async_trait]
pub trait PermissionStore: Send + Sync {
    async fn get_permission(&self, id: &Id) -> Result<Option<ObjectPermission>>;
    async fn list_permissions(&self) -> Result<Vec<ObjectPermission>>;
    async fn upsert_permission(&self, permission: ObjectPermission) -> Result<()>;
    async fn delete_permission(&self, id: &Id) -> Result<bool>;
    /// Enabled permissions assigned to the user directly or via group
    /// membership
    async fn list_permissions_for_user(&self, user: &UserContext) -> Result<Vec<ObjectPermission>>;
}

pub trait Store:
    BranchStore + StagedChangeStore + ObjectStore + PermissionStore + Send + Sync
{
}
