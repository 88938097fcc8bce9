use anyhow::{Context, Result};
use log::debug;
use serde_json::Value;
use std::collections::HashMap;

use crate::logic::permissions::{get_permission_for_type, EnforcementPolicy};
use crate::model::{
    ConstraintExpr, ObjectRecord, TypeRegistry, TypeTag, UserContext, CONSTRAINT_TOKEN_USER,
};
use crate::store::traits::{ObjectStore, PermissionStore};

/// Filter a collection of objects of one type down to those the user has
/// been granted the specified action on.
///
/// Superusers and exempt permissions pass the collection through untouched;
/// unauthenticated users and users holding no matching grant get an empty
/// collection; otherwise every applicable permission's constraint sets are
/// or-ed together and only matching objects survive. Malformed constraints
/// surface as errors rather than quietly widening or narrowing access.
pub async fn restrict<S: PermissionStore + ?Sized>(
    store: &S,
    registry: &TypeRegistry,
    policy: &EnforcementPolicy,
    user: &UserContext,
    action: &str,
    tag: &TypeTag,
    objects: Vec<ObjectRecord>,
) -> Result<Vec<ObjectRecord>> {
    let permission_required = get_permission_for_type(tag, action);

    if user.is_superuser || policy.permission_is_exempt(&permission_required)? {
        return Ok(objects);
    }
    if !user.is_authenticated {
        return Ok(Vec::new());
    }

    let applicable: Vec<_> = store
        .list_permissions_for_user(user)
        .await?
        .into_iter()
        .filter(|p| p.applies_to(tag) && p.grants(action))
        .collect();
    if applicable.is_empty() {
        debug!(
            "User '{}' holds no grant for {}; returning empty set",
            user.username, permission_required
        );
        return Ok(Vec::new());
    }

    // Each permission may define several constraint sets; each set is an
    // independent alternative. A null set grants model-level access, which
    // short-circuits all filtering.
    let mut alternatives: Vec<(&str, &ConstraintExpr)> = Vec::new();
    for permission in &applicable {
        for entry in permission.list_constraints() {
            match entry {
                None => return Ok(objects),
                Some(expr) => alternatives.push((permission.name.as_str(), expr)),
            }
        }
    }

    let def = registry.get(tag)?;
    let mut tokens = HashMap::new();
    tokens.insert(
        CONSTRAINT_TOKEN_USER.to_string(),
        Value::String(user.username.clone()),
    );

    let mut allowed = Vec::new();
    for object in objects {
        let mut matched = false;
        for (permission_name, expr) in &alternatives {
            if expr
                .matches(&object, def, &tokens)
                .with_context(|| format!("evaluating constraints of permission '{}'", permission_name))?
            {
                matched = true;
                break;
            }
        }
        if matched {
            allowed.push(object);
        }
    }
    Ok(allowed)
}

/// List all live objects of a type through the store, restricted for the
/// given user and action.
pub async fn restrict_type<S>(
    store: &S,
    registry: &TypeRegistry,
    policy: &EnforcementPolicy,
    user: &UserContext,
    action: &str,
    tag: &TypeTag,
) -> Result<Vec<ObjectRecord>>
where
    S: ObjectStore + PermissionStore + ?Sized,
{
    let objects = store.list_objects_by_type(tag).await?;
    restrict(store, registry, policy, user, action, tag, objects).await
}
