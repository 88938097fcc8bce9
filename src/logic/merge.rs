use anyhow::Result;
use log::info;
use serde::{Deserialize, Serialize};

use crate::error::StagingError;
use crate::model::TypeRegistry;
use crate::store::traits::Store;

/// Summary of a completed merge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub branch: String,
    pub applied: u64,
}

/// Durably apply all of a branch's staged changes to the live objects in
/// creation order, then discard them.
///
/// The application is all-or-nothing: a failure applying any single change
/// leaves the live objects exactly as they were and every staged row in
/// place for retry. A staged delete whose target is already absent is a
/// no-op; a staged update blindly overwrites whatever the live row holds at
/// merge time (last-applier-wins, as with any deferred changelog).
pub async fn merge_branch<S: Store + ?Sized>(
    store: &S,
    registry: &TypeRegistry,
    branch: &str,
) -> Result<MergeOutcome> {
    let branch = store
        .get_branch(branch)
        .await?
        .ok_or_else(|| StagingError::BranchNotFound(branch.to_string()))?;

    info!("Merging changes in branch {}", branch);
    let applied = store.apply_staged(registry, &branch.name).await?;
    info!("Merged {} staged changes from branch {}", applied, branch);

    Ok(MergeOutcome {
        branch: branch.name,
        applied,
    })
}
