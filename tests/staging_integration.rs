use serde_json::json;
use staged_db::logic::checkout::{checkout, CheckoutSession};
use staged_db::logic::merge::merge_branch;
use staged_db::logic::permissions::EnforcementPolicy;
use staged_db::logic::restrict::restrict_type;
use staged_db::model::{
    ChangeAction, ConstraintSets, NewBranch, ObjectKey, ObjectPermission, ObjectRecord,
    ObjectTypeDef, Snapshot, TypeRegistry, TypeTag, UserContext,
};
use staged_db::store::memory::MemoryStore;
use staged_db::store::traits::{BranchStore, ObjectStore, PermissionStore, StagedChangeStore};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn site_tag() -> TypeTag {
    TypeTag::new("dcim", "site")
}

fn registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    registry.register(ObjectTypeDef::new(
        site_tag(),
        "site",
        &["name", "status", "owner"],
    ));
    registry
}

fn site(id: &str, fields: &[(&str, serde_json::Value)]) -> ObjectRecord {
    let mut snapshot = Snapshot::new();
    for (name, value) in fields {
        snapshot.insert(name.to_string(), value.clone());
    }
    ObjectRecord::new(site_tag(), id, snapshot)
}

async fn store_with_branch(name: &str) -> MemoryStore {
    init_logging();
    let store = MemoryStore::new();
    store.create_branch(NewBranch::named(name)).await.unwrap();
    store
}

#[tokio::test]
async fn coalescing_many_mutations_into_one_staged_row() {
    let store = store_with_branch("b").await;
    let registry = registry();

    let mut scope = CheckoutSession::enter(&store, &registry, "b").await.unwrap();
    scope
        .save(site("5", &[("name", json!("v1"))]))
        .await
        .unwrap();
    scope
        .save(site("5", &[("name", json!("v2"))]))
        .await
        .unwrap();
    scope
        .save(site("5", &[("name", json!("v3")), ("status", json!("active"))]))
        .await
        .unwrap();
    let staged = scope.finish().await.unwrap();

    // One row, snapshot of the final state, action widened from the creation
    assert_eq!(staged.len(), 1);
    assert_eq!(staged[0].action, ChangeAction::Create);
    let data = staged[0].data.as_ref().unwrap();
    assert_eq!(data["name"], json!("v3"));
    assert_eq!(data["status"], json!("active"));
}

#[tokio::test]
async fn delete_dominates_any_prior_queue_state() {
    let store = store_with_branch("b").await;
    let registry = registry();
    store
        .upsert_object(site("1", &[("name", json!("live"))]))
        .await
        .unwrap();

    let mut scope = CheckoutSession::enter(&store, &registry, "b").await.unwrap();
    scope
        .save(site("1", &[("name", json!("edited"))]))
        .await
        .unwrap();
    scope
        .delete(&ObjectKey::new(site_tag(), "1"))
        .await
        .unwrap();

    let created = scope.save(site("9", &[("name", json!("temp"))])).await.unwrap();
    scope.delete(&created).await.unwrap();

    let staged = scope.finish().await.unwrap();
    assert_eq!(staged.len(), 2);
    for change in &staged {
        assert_eq!(change.action, ChangeAction::Delete);
        assert!(change.data.is_none());
    }
}

#[tokio::test]
async fn rollback_isolation_only_staged_rows_persist() {
    let store = store_with_branch("b").await;
    let registry = registry();
    store
        .upsert_object(site("1", &[("name", json!("original"))]))
        .await
        .unwrap();

    let mut scope = CheckoutSession::enter(&store, &registry, "b").await.unwrap();
    scope
        .save(site("1", &[("name", json!("mutated"))]))
        .await
        .unwrap();
    scope.save(site("2", &[("name", json!("new"))])).await.unwrap();
    scope.finish().await.unwrap();

    let live = store
        .get_object(&ObjectKey::new(site_tag(), "1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(live.field("name"), Some(&json!("original")));
    assert!(store
        .get_object(&ObjectKey::new(site_tag(), "2"))
        .await
        .unwrap()
        .is_none());
    assert_eq!(store.count_staged_for_branch("b").await.unwrap(), 2);
}

#[tokio::test]
async fn merge_replays_changes_in_creation_order() {
    let store = store_with_branch("b").await;
    let registry = registry();

    // Two scopes: the second edits what the first created
    let mut first = CheckoutSession::enter(&store, &registry, "b").await.unwrap();
    first
        .save(site("1", &[("name", json!("created"))]))
        .await
        .unwrap();
    first.finish().await.unwrap();

    let mut second = CheckoutSession::enter(&store, &registry, "b").await.unwrap();
    second
        .save(site("1", &[("name", json!("edited"))]))
        .await
        .unwrap();
    second.finish().await.unwrap();

    let staged = store.list_staged_for_branch("b").await.unwrap();
    assert_eq!(staged.len(), 2);
    assert_eq!(staged[0].action, ChangeAction::Create);
    assert_eq!(staged[1].action, ChangeAction::Update);

    let outcome = merge_branch(&store, &registry, "b").await.unwrap();
    assert_eq!(outcome.applied, 2);
    assert_eq!(store.count_staged_for_branch("b").await.unwrap(), 0);

    let live = store
        .get_object(&ObjectKey::new(site_tag(), "1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(live.field("name"), Some(&json!("edited")));
}

#[tokio::test]
async fn merge_atomicity_failure_leaves_everything_for_retry() {
    let store = store_with_branch("b").await;
    let registry = registry();

    let mut scope = CheckoutSession::enter(&store, &registry, "b").await.unwrap();
    scope
        .save(site("1", &[("name", json!("good"))]))
        .await
        .unwrap();
    scope.finish().await.unwrap();

    // Sneak in a snapshot the registry will reject at merge time
    store
        .append_staged(
            "b",
            vec![staged_db::model::NewStagedChange {
                action: ChangeAction::Create,
                object_type: site_tag(),
                object_id: Some("2".to_string()),
                data: Some({
                    let mut fields = Snapshot::new();
                    fields.insert("asn".to_string(), json!(65000));
                    fields
                }),
            }],
        )
        .await
        .unwrap();

    assert!(merge_branch(&store, &registry, "b").await.is_err());

    // No partial application, and the rows are intact for retry
    assert!(store
        .get_object(&ObjectKey::new(site_tag(), "1"))
        .await
        .unwrap()
        .is_none());
    assert_eq!(store.count_staged_for_branch("b").await.unwrap(), 2);
}

#[tokio::test]
async fn permission_round_trip_constraint_filters_collection() {
    init_logging();
    let store = MemoryStore::new();
    let registry = registry();
    store
        .upsert_object(site("1", &[("status", json!("active"))]))
        .await
        .unwrap();
    store
        .upsert_object(site("2", &[("status", json!("retired"))]))
        .await
        .unwrap();
    store
        .upsert_object(site("3", &[("status", json!("active"))]))
        .await
        .unwrap();

    let constraints: ConstraintSets = serde_json::from_value(json!(
        {"and": [{"attr": "status", "value": "active", "op": "eq"}]}
    ))
    .unwrap();
    store
        .upsert_permission(ObjectPermission {
            id: "p1".to_string(),
            name: "view active sites".to_string(),
            description: None,
            enabled: true,
            object_types: vec![site_tag()],
            actions: vec!["view".to_string()],
            constraints: Some(constraints),
            users: vec!["alice".to_string()],
            groups: vec![],
        })
        .await
        .unwrap();

    let visible = restrict_type(
        &store,
        &registry,
        &EnforcementPolicy::default(),
        &UserContext::new("alice"),
        "view",
        &site_tag(),
    )
    .await
    .unwrap();
    let ids: Vec<&str> = visible.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "3"]);
}

#[tokio::test]
async fn unconditional_grant_returns_full_collection() {
    init_logging();
    let store = MemoryStore::new();
    let registry = registry();
    for id in ["1", "2", "3"] {
        store
            .upsert_object(site(id, &[("status", json!("active"))]))
            .await
            .unwrap();
    }
    store
        .upsert_permission(ObjectPermission {
            id: "p1".to_string(),
            name: "delete all sites".to_string(),
            description: None,
            enabled: true,
            object_types: vec![site_tag()],
            actions: vec!["delete".to_string()],
            constraints: None,
            users: vec!["alice".to_string()],
            groups: vec![],
        })
        .await
        .unwrap();

    let visible = restrict_type(
        &store,
        &registry,
        &EnforcementPolicy::default(),
        &UserContext::new("alice"),
        "delete",
        &site_tag(),
    )
    .await
    .unwrap();
    assert_eq!(visible.len(), 3);
}

#[tokio::test]
async fn authenticated_user_without_grant_sees_nothing() {
    init_logging();
    let store = MemoryStore::new();
    let registry = registry();
    store
        .upsert_object(site("1", &[("status", json!("active"))]))
        .await
        .unwrap();

    let visible = restrict_type(
        &store,
        &registry,
        &EnforcementPolicy::default(),
        &UserContext::new("alice"),
        "change",
        &site_tag(),
    )
    .await
    .unwrap();
    assert!(visible.is_empty());
}

#[tokio::test]
async fn branch_scenario_create_update_merge() {
    init_logging();
    let store = MemoryStore::new();
    let registry = registry();
    store
        .create_branch(NewBranch::named("my-branch"))
        .await
        .unwrap();

    // Create object 5, then immediately update its name within one scope
    let (_, staged) = checkout(&store, &registry, "my-branch", |scope| {
        Box::pin(async move {
            scope.save(site("5", &[("name", json!("bar"))])).await?;
            scope.save(site("5", &[("name", json!("foo"))])).await?;
            Ok(())
        })
    })
    .await
    .unwrap();

    assert_eq!(staged.len(), 1);
    assert_eq!(staged[0].branch, "my-branch");
    assert_eq!(staged[0].action, ChangeAction::Create);
    assert_eq!(staged[0].object_id.as_deref(), Some("5"));
    assert_eq!(staged[0].data.as_ref().unwrap()["name"], json!("foo"));

    merge_branch(&store, &registry, "my-branch").await.unwrap();

    let live = store
        .get_object(&ObjectKey::new(site_tag(), "5"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(live.field("name"), Some(&json!("foo")));
    assert_eq!(
        store.count_staged_for_branch("my-branch").await.unwrap(),
        0
    );
}

#[tokio::test]
async fn abandoning_a_branch_discards_its_changes() {
    let store = store_with_branch("scratch").await;
    let registry = registry();

    let (_, staged) = checkout(&store, &registry, "scratch", |scope| {
        Box::pin(async move {
            scope.save(site("1", &[("name", json!("draft"))])).await?;
            Ok(())
        })
    })
    .await
    .unwrap();
    assert_eq!(staged.len(), 1);

    assert!(store.delete_branch("scratch").await.unwrap());
    assert_eq!(store.count_staged_for_branch("scratch").await.unwrap(), 0);
    assert!(store
        .get_object(&ObjectKey::new(site_tag(), "1"))
        .await
        .unwrap()
        .is_none());
}
