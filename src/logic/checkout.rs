use anyhow::Result;
use itertools::Itertools;
use log::{debug, error};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use crate::error::StagingError;
use crate::model::{
    generate_id, Branch, ChangeAction, NewStagedChange, ObjectKey, ObjectRecord, Snapshot,
    StagedChange, TypeRegistry, TypeTag,
};
use crate::store::traits::Store;

/// In-memory queue of captured mutations, keyed by object identity. Later
/// mutations to a key collapse into its existing entry, so one checkout
/// scope produces at most one staged change per object. Entries keep their
/// first-capture position, which becomes the staged creation order.
#[derive(Debug, Default)]
struct ChangeQueue {
    entries: Vec<QueuedChange>,
    index: HashMap<ObjectKey, usize>,
}

#[derive(Debug)]
struct QueuedChange {
    key: ObjectKey,
    action: ChangeAction,
    data: Option<Snapshot>,
}

impl ChangeQueue {
    fn contains(&self, key: &ObjectKey) -> bool {
        self.index.contains_key(key)
    }

    /// Queue an action for a key, overwriting any previous entry for it
    fn set(&mut self, key: ObjectKey, action: ChangeAction, data: Option<Snapshot>) {
        match self.index.get(&key) {
            Some(&position) => {
                self.entries[position].action = action;
                self.entries[position].data = data;
            }
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push(QueuedChange { key, action, data });
            }
        }
    }

    /// Refresh a queued entry's snapshot without changing its action
    fn refresh(&mut self, key: &ObjectKey, data: Option<Snapshot>) {
        if let Some(&position) = self.index.get(key) {
            self.entries[position].data = data;
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn into_changes(self) -> Vec<NewStagedChange> {
        self.entries
            .into_iter()
            .map(|entry| NewStagedChange {
                action: entry.action,
                object_type: entry.key.object_type,
                object_id: Some(entry.key.object_id),
                data: entry.data,
            })
            .collect()
    }
}

/// A scoped unit of work in which saves and deletes against tracked objects
/// are captured instead of durably committed.
///
/// Writes inside the scope land in a workspace overlay shadowing the live
/// store; reads see the overlay first, so work within the scope observes its
/// own mutations and any previously staged state for the branch. The overlay
/// is discarded when the session ends; the only durable effect of a scope
/// is the `StagedChange` rows written by [`CheckoutSession::finish`].
///
/// A session is exclusively owned by its task. Two concurrent sessions on
/// the same branch are not safe against each other; callers must serialize
/// per branch.
pub struct CheckoutSession<'a, S: Store + ?Sized> {
    store: &'a S,
    registry: &'a TypeRegistry,
    branch: Branch,
    queue: ChangeQueue,
    overlay: HashMap<ObjectKey, Option<ObjectRecord>>,
}

impl<'a, S: Store + ?Sized> CheckoutSession<'a, S> {
    /// Open a checkout scope for a branch, replaying its already-staged
    /// changes so the scope sees prior staged state.
    pub async fn enter(store: &'a S, registry: &'a TypeRegistry, branch: &str) -> Result<Self> {
        let branch = store
            .get_branch(branch)
            .await?
            .ok_or_else(|| StagingError::BranchNotFound(branch.to_string()))?;
        debug!("Entering checkout scope for {}", branch);

        let mut session = Self {
            store,
            registry,
            branch,
            queue: ChangeQueue::default(),
            overlay: HashMap::new(),
        };

        let staged = session
            .store
            .list_staged_for_branch(&session.branch.name)
            .await?;
        if staged.is_empty() {
            debug!("No pre-staged changes found");
        } else {
            debug!("Applying {} pre-staged changes", staged.len());
            for change in &staged {
                session.replay(change)?;
            }
        }
        Ok(session)
    }

    /// Replay a previously staged change into the overlay. Replayed state is
    /// visible within the scope but does not re-enter the queue.
    fn replay(&mut self, change: &StagedChange) -> Result<()> {
        match change.action {
            ChangeAction::Create | ChangeAction::Update => {
                if let Some(record) = change.reconstruct(self.registry)? {
                    self.overlay.insert(record.key(), Some(record));
                }
            }
            ChangeAction::Delete => {
                let key = change
                    .key()
                    .ok_or(StagingError::MissingObjectId(change.id))?;
                self.overlay.insert(key, None);
            }
        }
        Ok(())
    }

    pub fn branch(&self) -> &Branch {
        &self.branch
    }

    /// Number of queued changes captured so far
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub async fn get(&self, key: &ObjectKey) -> Result<Option<ObjectRecord>> {
        if let Some(entry) = self.overlay.get(key) {
            return Ok(entry.clone());
        }
        self.store.get_object(key).await
    }

    pub async fn list(&self, tag: &TypeTag) -> Result<Vec<ObjectRecord>> {
        let mut by_key: HashMap<ObjectKey, ObjectRecord> = self
            .store
            .list_objects_by_type(tag)
            .await?
            .into_iter()
            .map(|record| (record.key(), record))
            .collect();
        for (key, entry) in &self.overlay {
            if &key.object_type != tag {
                continue;
            }
            match entry {
                Some(record) => {
                    by_key.insert(key.clone(), record.clone());
                }
                None => {
                    by_key.remove(key);
                }
            }
        }
        Ok(by_key
            .into_values()
            .sorted_by(|a, b| a.id.cmp(&b.id))
            .collect())
    }

    /// Capture a create or update of an object. Records without an id get a
    /// fresh one assigned. The queued action is CREATE when the object is
    /// not currently visible in the scope, otherwise UPDATE; repeated saves
    /// refresh the queued snapshot without changing the action.
    pub async fn save(&mut self, mut record: ObjectRecord) -> Result<ObjectKey> {
        let def = self.registry.get(&record.object_type)?;
        if record.id.is_empty() {
            record.id = generate_id();
        }
        let key = record.key();
        let data = record.fields.clone();

        if !self.visible(&key).await? {
            debug!(
                "[{}] Staging creation of {} {}",
                self.branch, def.display_name, key.object_id
            );
            self.queue.set(key.clone(), ChangeAction::Create, Some(data));
        } else if self.queue.contains(&key) {
            debug!(
                "[{}] Updating staged value for {} {}",
                self.branch, def.display_name, key.object_id
            );
            self.queue.refresh(&key, Some(data));
        } else {
            debug!(
                "[{}] Staging changes to {} {}",
                self.branch, def.display_name, key.object_id
            );
            self.queue.set(key.clone(), ChangeAction::Update, Some(data));
        }

        self.overlay.insert(key.clone(), Some(record));
        Ok(key)
    }

    /// Capture a deletion. A delete always overwrites whatever was queued
    /// for the key; nothing survives a delete.
    pub async fn delete(&mut self, key: &ObjectKey) -> Result<()> {
        let def = self.registry.get(&key.object_type)?;
        if !self.visible(key).await? {
            return Err(StagingError::ObjectNotFound(
                key.object_type.clone(),
                key.object_id.clone(),
            )
            .into());
        }
        debug!(
            "[{}] Staging deletion of {} {}",
            self.branch, def.display_name, key.object_id
        );
        self.queue.set(key.clone(), ChangeAction::Delete, None);
        self.overlay.insert(key.clone(), None);
        Ok(())
    }

    async fn visible(&self, key: &ObjectKey) -> Result<bool> {
        if let Some(entry) = self.overlay.get(key) {
            return Ok(entry.is_some());
        }
        Ok(self.store.get_object(key).await?.is_some())
    }

    /// Close the scope: discard the workspace overlay and persist the
    /// queued changes as `StagedChange` rows in capture order.
    pub async fn finish(self) -> Result<Vec<StagedChange>> {
        debug!("Leaving checkout scope for {}", self.branch);
        if self.queue.is_empty() {
            debug!("No queued changes");
            return Ok(Vec::new());
        }
        debug!("Processing {} queued changes", self.queue.len());
        self.store
            .append_staged(&self.branch.name, self.queue.into_changes())
            .await
    }
}

/// Run `body` inside a checkout scope for `branch` with guaranteed cleanup:
/// whatever the body captured before returning (or before failing) is
/// flushed to staged changes, and the workspace overlay is discarded on
/// every exit path. Returns the body's value together with the staged rows.
///
/// ```ignore
/// let (_, staged) = checkout(&store, &registry, "my-branch", |scope| {
///     Box::pin(async move {
///         scope.save(record).await?;
///         Ok(())
///     })
/// })
/// .await?;
/// ```
pub async fn checkout<'a, S, T, F>(
    store: &'a S,
    registry: &'a TypeRegistry,
    branch: &str,
    body: F,
) -> Result<(T, Vec<StagedChange>)>
where
    S: Store + ?Sized,
    F: for<'s> FnOnce(
        &'s mut CheckoutSession<'a, S>,
    ) -> Pin<Box<dyn Future<Output = Result<T>> + Send + 's>>,
{
    let mut session = CheckoutSession::enter(store, registry, branch).await?;
    let result = body(&mut session).await;
    let flushed = session.finish().await;

    match (result, flushed) {
        (Ok(value), Ok(staged)) => Ok((value, staged)),
        (Err(err), Ok(_)) => Err(err),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), Err(flush_err)) => {
            error!("Failed to flush staged changes: {:#}", flush_err);
            Err(err)
        }
    }
}
