use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::str::FromStr;

use crate::model::{
    Branch, ChangeAction, Id, NewBranch, NewStagedChange, ObjectKey, ObjectPermission,
    ObjectRecord, Snapshot, StagedChange, TypeRegistry, TypeTag, UserContext,
};
use crate::store::traits::{
    BranchStore, ObjectStore, PermissionStore, StagedChangeStore, Store,
};

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store with the given database URL
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await
            .context("Failed to create PostgreSQL connection pool")?;

        Ok(Self { pool })
    }

    /// Create the schema if it does not exist yet
    pub async fn migrate(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS branches (
                name        TEXT PRIMARY KEY,
                description TEXT,
                owner       TEXT,
                created_at  TIMESTAMPTZ NOT NULL,
                updated_at  TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS staged_changes (
                id          BIGSERIAL PRIMARY KEY,
                branch      TEXT NOT NULL REFERENCES branches(name) ON DELETE CASCADE,
                action      TEXT NOT NULL,
                object_type TEXT NOT NULL,
                object_id   TEXT,
                data        JSONB,
                created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS staged_changes_branch_idx
                ON staged_changes (branch, id)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS objects (
                object_type TEXT NOT NULL,
                id          TEXT NOT NULL,
                fields      JSONB NOT NULL,
                PRIMARY KEY (object_type, id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS object_permissions (
                id           TEXT PRIMARY KEY,
                name         TEXT NOT NULL,
                description  TEXT,
                enabled      BOOLEAN NOT NULL,
                object_types JSONB NOT NULL,
                actions      JSONB NOT NULL,
                constraints  JSONB,
                user_names   JSONB NOT NULL,
                group_names  JSONB NOT NULL
            )
            "#,
        ];
        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to run schema migration")?;
        }
        Ok(())
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn branch_from_row(row: &PgRow) -> Branch {
    Branch {
        name: row.get("name"),
        description: row.get("description"),
        user: row.get("owner"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn snapshot_from_value(value: Option<Value>) -> Result<Option<Snapshot>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(other) => Err(anyhow!("staged snapshot is not a JSON object: {}", other)),
    }
}

fn staged_change_from_row(row: &PgRow) -> Result<StagedChange> {
    let action: String = row.get("action");
    let object_type: String = row.get("object_type");
    Ok(StagedChange {
        id: row.get("id"),
        branch: row.get("branch"),
        action: ChangeAction::from_str(&action)?,
        object_type: TypeTag::parse(&object_type)?,
        object_id: row.get("object_id"),
        data: snapshot_from_value(row.get("data"))?,
        created_at: row.get("created_at"),
    })
}

fn object_from_row(row: &PgRow) -> Result<ObjectRecord> {
    let object_type: String = row.get("object_type");
    let fields = snapshot_from_value(row.get("fields"))?
        .ok_or_else(|| anyhow!("object row has no fields"))?;
    Ok(ObjectRecord {
        object_type: TypeTag::parse(&object_type)?,
        id: row.get("id"),
        fields,
    })
}

fn permission_from_row(row: &PgRow) -> Result<ObjectPermission> {
    let object_types: Value = row.get("object_types");
    let actions: Value = row.get("actions");
    let constraints: Option<Value> = row.get("constraints");
    let users: Value = row.get("user_names");
    let groups: Value = row.get("group_names");
    Ok(ObjectPermission {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        enabled: row.get("enabled"),
        object_types: serde_json::from_value(object_types)
            .context("Failed to decode permission object types")?,
        actions: serde_json::from_value(actions).context("Failed to decode permission actions")?,
        constraints: match constraints {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                serde_json::from_value(value).context("Failed to decode permission constraints")?,
            ),
        },
        users: serde_json::from_value(users).context("Failed to decode permission users")?,
        groups: serde_json::from_value(groups).context("Failed to decode permission groups")?,
    })
}

async fn apply_change(
    tx: &mut Transaction<'_, Postgres>,
    registry: &TypeRegistry,
    change: &StagedChange,
) -> Result<()> {
    match change.action {
        ChangeAction::Create | ChangeAction::Update => {
            let Some(record) = change.reconstruct(registry)? else {
                return Ok(());
            };
            sqlx::query(
                r#"
                INSERT INTO objects (object_type, id, fields)
                VALUES ($1, $2, $3)
                ON CONFLICT (object_type, id) DO UPDATE SET fields = EXCLUDED.fields
                "#,
            )
            .bind(record.object_type.as_str())
            .bind(&record.id)
            .bind(Value::Object(record.fields.clone()))
            .execute(&mut **tx)
            .await
            .context("Failed to apply staged create/update")?;
        }
        ChangeAction::Delete => {
            let key = change
                .key()
                .ok_or(crate::error::StagingError::MissingObjectId(change.id))?;
            // Already-absent objects are tolerated: deletes are idempotent
            sqlx::query("DELETE FROM objects WHERE object_type = $1 AND id = $2")
                .bind(key.object_type.as_str())
                .bind(&key.object_id)
                .execute(&mut **tx)
                .await
                .context("Failed to apply staged delete")?;
        }
    }
    Ok(())
}

#[async_trait::async_trait]
impl BranchStore for PostgresStore {
    async fn get_branch(&self, name: &str) -> Result<Option<Branch>> {
        let row = sqlx::query(
            "SELECT name, description, owner, created_at, updated_at FROM branches WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch branch")?;

        Ok(row.as_ref().map(branch_from_row))
    }

    async fn list_branches(&self) -> Result<Vec<Branch>> {
        let rows = sqlx::query(
            "SELECT name, description, owner, created_at, updated_at FROM branches ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list branches")?;

        Ok(rows.iter().map(branch_from_row).collect())
    }

    async fn create_branch(&self, branch: NewBranch) -> Result<Branch> {
        let branch = branch.into_branch();
        sqlx::query(
            r#"
            INSERT INTO branches (name, description, owner, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&branch.name)
        .bind(&branch.description)
        .bind(&branch.user)
        .bind(branch.created_at)
        .bind(branch.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to create branch")?;

        Ok(branch)
    }

    async fn delete_branch(&self, name: &str) -> Result<bool> {
        // staged_changes rows go with it via ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM branches WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await
            .context("Failed to delete branch")?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl StagedChangeStore for PostgresStore {
    async fn list_staged_for_branch(&self, branch: &str) -> Result<Vec<StagedChange>> {
        let rows = sqlx::query(
            r#"
            SELECT id, branch, action, object_type, object_id, data, created_at
            FROM staged_changes WHERE branch = $1 ORDER BY id
            "#,
        )
        .bind(branch)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list staged changes")?;

        rows.iter().map(staged_change_from_row).collect()
    }

    async fn append_staged(
        &self,
        branch: &str,
        changes: Vec<NewStagedChange>,
    ) -> Result<Vec<StagedChange>> {
        let mut tx = self.pool.begin().await?;
        let mut created = Vec::with_capacity(changes.len());
        for change in changes {
            let row = sqlx::query(
                r#"
                INSERT INTO staged_changes (branch, action, object_type, object_id, data)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id, branch, action, object_type, object_id, data, created_at
                "#,
            )
            .bind(branch)
            .bind(change.action.as_str())
            .bind(change.object_type.as_str())
            .bind(&change.object_id)
            .bind(change.data.map(Value::Object))
            .fetch_one(&mut *tx)
            .await
            .context("Failed to append staged change")?;
            created.push(staged_change_from_row(&row)?);
        }
        tx.commit().await?;
        Ok(created)
    }

    async fn clear_staged_for_branch(&self, branch: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM staged_changes WHERE branch = $1")
            .bind(branch)
            .execute(&self.pool)
            .await
            .context("Failed to clear staged changes")?;

        Ok(result.rows_affected())
    }

    async fn count_staged_for_branch(&self, branch: &str) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM staged_changes WHERE branch = $1")
            .bind(branch)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count staged changes")?;

        let count: i64 = row.get("count");
        Ok(count as u64)
    }
}

#[async_trait::async_trait]
impl ObjectStore for PostgresStore {
    async fn get_object(&self, key: &ObjectKey) -> Result<Option<ObjectRecord>> {
        let row = sqlx::query(
            "SELECT object_type, id, fields FROM objects WHERE object_type = $1 AND id = $2",
        )
        .bind(key.object_type.as_str())
        .bind(&key.object_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch object")?;

        row.as_ref().map(object_from_row).transpose()
    }

    async fn list_objects_by_type(&self, tag: &TypeTag) -> Result<Vec<ObjectRecord>> {
        let rows = sqlx::query(
            "SELECT object_type, id, fields FROM objects WHERE object_type = $1 ORDER BY id",
        )
        .bind(tag.as_str())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list objects")?;

        rows.iter().map(object_from_row).collect()
    }

    async fn upsert_object(&self, record: ObjectRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO objects (object_type, id, fields)
            VALUES ($1, $2, $3)
            ON CONFLICT (object_type, id) DO UPDATE SET fields = EXCLUDED.fields
            "#,
        )
        .bind(record.object_type.as_str())
        .bind(&record.id)
        .bind(Value::Object(record.fields))
        .execute(&self.pool)
        .await
        .context("Failed to upsert object")?;

        Ok(())
    }

    async fn delete_object(&self, key: &ObjectKey) -> Result<bool> {
        let result = sqlx::query("DELETE FROM objects WHERE object_type = $1 AND id = $2")
            .bind(key.object_type.as_str())
            .bind(&key.object_id)
            .execute(&self.pool)
            .await
            .context("Failed to delete object")?;

        Ok(result.rows_affected() > 0)
    }

    async fn apply_staged(&self, registry: &TypeRegistry, branch: &str) -> Result<u64> {
        // One transaction applies every change and clears the branch's rows;
        // any failure rolls the whole merge back.
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            SELECT id, branch, action, object_type, object_id, data, created_at
            FROM staged_changes WHERE branch = $1 ORDER BY id
            FOR UPDATE
            "#,
        )
        .bind(branch)
        .fetch_all(&mut *tx)
        .await
        .context("Failed to load staged changes for merge")?;

        let changes: Vec<StagedChange> = rows
            .iter()
            .map(staged_change_from_row)
            .collect::<Result<_>>()?;

        for change in &changes {
            apply_change(&mut tx, registry, change).await?;
        }

        sqlx::query("DELETE FROM staged_changes WHERE branch = $1")
            .bind(branch)
            .execute(&mut *tx)
            .await
            .context("Failed to clear merged staged changes")?;

        tx.commit().await?;
        Ok(changes.len() as u64)
    }
}

#[async_trait::async_trait]
impl PermissionStore for PostgresStore {
    async fn get_permission(&self, id: &Id) -> Result<Option<ObjectPermission>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, description, enabled, object_types, actions, constraints,
                   user_names, group_names
            FROM object_permissions WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch permission")?;

        row.as_ref().map(permission_from_row).transpose()
    }

    async fn list_permissions(&self) -> Result<Vec<ObjectPermission>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, description, enabled, object_types, actions, constraints,
                   user_names, group_names
            FROM object_permissions ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list permissions")?;

        rows.iter().map(permission_from_row).collect()
    }

    async fn upsert_permission(&self, permission: ObjectPermission) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO object_permissions
                (id, name, description, enabled, object_types, actions, constraints,
                 user_names, group_names)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                enabled = EXCLUDED.enabled,
                object_types = EXCLUDED.object_types,
                actions = EXCLUDED.actions,
                constraints = EXCLUDED.constraints,
                user_names = EXCLUDED.user_names,
                group_names = EXCLUDED.group_names
            "#,
        )
        .bind(&permission.id)
        .bind(&permission.name)
        .bind(&permission.description)
        .bind(permission.enabled)
        .bind(serde_json::to_value(&permission.object_types)?)
        .bind(serde_json::to_value(&permission.actions)?)
        .bind(
            permission
                .constraints
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?,
        )
        .bind(serde_json::to_value(&permission.users)?)
        .bind(serde_json::to_value(&permission.groups)?)
        .execute(&self.pool)
        .await
        .context("Failed to upsert permission")?;

        Ok(())
    }

    async fn delete_permission(&self, id: &Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM object_permissions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete permission")?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_permissions_for_user(&self, user: &UserContext) -> Result<Vec<ObjectPermission>> {
        // Assignment matching (direct user or group membership) happens here
        // rather than in SQL; permission counts are small.
        let permissions = self.list_permissions().await?;
        Ok(permissions
            .into_iter()
            .filter(|p| {
                p.enabled
                    && (p.users.contains(&user.username)
                        || p.groups.iter().any(|g| user.groups.contains(g)))
            })
            .collect())
    }
}

impl Store for PostgresStore {}
