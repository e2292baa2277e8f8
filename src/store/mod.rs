//! Persistence of resource permissions.
//!
//! Every subject owns one managed role per org. Setting a subject's actions
//! on a resource converges that role's grants at the resource scope to the
//! desired set inside one transaction.

mod roles;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};

use crate::db::row_parsers::{permission_from_row, subject_from_row};
use crate::db::WriteTx;
use crate::errors::{AppError, AppResult};
use crate::models::rbac::{FixedRole, Permission, Role, Subject, GLOBAL_ORG_ID, MANAGED_ROLE_PREFIX};
use crate::models::resource_permission::{
    GetResourcePermissionsQuery, ResourcePermission, SetResourcePermissionCommand,
    SetResourcePermissionsCommand, UserPermissionsQuery,
};
use crate::scope;

pub use roles::managed_role_uid;

const PERMISSION_COLUMNS: &str = "id, role_id, action, scope, created, updated";

/// Runs after a subject's grant converged, on the same transaction.
#[async_trait]
pub trait ResourceHook: Send + Sync {
    async fn on_set(
        &self,
        conn: &mut SqliteConnection,
        org_id: i64,
        subject: &Subject,
        resource_id: &str,
        permission: &ResourcePermission,
    ) -> AppResult<()>;
}

/// Hooks for batch updates, chosen by subject kind.
#[derive(Clone, Default)]
pub struct ResourceHooks {
    pub user: Option<Arc<dyn ResourceHook>>,
    pub team: Option<Arc<dyn ResourceHook>>,
    pub builtin: Option<Arc<dyn ResourceHook>>,
}

impl ResourceHooks {
    pub fn hook_for(&self, subject: &Subject) -> Option<&dyn ResourceHook> {
        match subject {
            Subject::User(_) => self.user.as_deref(),
            Subject::Team(_) => self.team.as_deref(),
            Subject::BuiltInRole(_) => self.builtin.as_deref(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResourcePermissionStore {
    pool: SqlitePool,
}

impl ResourcePermissionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Converges one subject's actions on one resource.
    ///
    /// An empty `actions` list revokes everything at the resource scope and
    /// yields a [`ResourcePermission`] with no actions.
    pub async fn set_resource_permission(
        &self,
        org_id: i64,
        subject: &Subject,
        command: &SetResourcePermissionCommand,
        hook: Option<&dyn ResourceHook>,
    ) -> AppResult<ResourcePermission> {
        let mut tx = WriteTx::begin(&self.pool).await?;

        let permission = converge(tx.conn()?, org_id, subject, command).await?;
        if let Some(hook) = hook {
            hook.on_set(tx.conn()?, org_id, subject, &command.resource_id, &permission)
                .await?;
        }

        tx.commit().await?;
        Ok(permission)
    }

    /// Converges several subjects in one transaction. Results follow the
    /// order of `commands`.
    pub async fn set_resource_permissions(
        &self,
        org_id: i64,
        commands: &[SetResourcePermissionsCommand],
        hooks: &ResourceHooks,
    ) -> AppResult<Vec<ResourcePermission>> {
        let mut tx = WriteTx::begin(&self.pool).await?;
        let mut results = Vec::with_capacity(commands.len());

        for cmd in commands {
            let permission = converge(tx.conn()?, org_id, &cmd.subject, &cmd.command).await?;
            if let Some(hook) = hooks.hook_for(&cmd.subject) {
                hook.on_set(tx.conn()?, org_id, &cmd.subject, &cmd.command.resource_id, &permission)
                    .await?;
            }
            results.push(permission);
        }

        tx.commit().await?;
        Ok(results)
    }

    /// Grants on a resource, one entry per (role, subject, scope).
    ///
    /// Grants on wildcards covering the resource and on `inherited_scopes`
    /// are included and flagged `is_inherited`.
    pub async fn get_resource_permissions(
        &self,
        org_id: i64,
        query: &GetResourcePermissionsQuery,
    ) -> AppResult<Vec<ResourcePermission>> {
        if query.actions.is_empty() {
            return Ok(Vec::new());
        }

        let target = query.scope();
        let mut scopes = vec![
            target.clone(),
            scope::ALL.to_string(),
            scope::build(&[&query.resource, "*"]),
            scope::build(&[&query.resource, &query.resource_attribute, "*"]),
        ];
        scopes.extend(query.inherited_scopes.iter().cloned());
        let scopes: BTreeSet<String> = scopes.into_iter().collect();

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT p.id, p.role_id, p.action, p.scope, p.created, p.updated, \
             r.name AS role_name, b.subject_kind, b.subject_identifier \
             FROM permission p \
             INNER JOIN role r ON r.id = p.role_id \
             INNER JOIN role_binding b ON b.role_id = r.id AND b.org_id = ",
        );
        qb.push_bind(org_id);
        qb.push(" WHERE (r.org_id = ");
        qb.push_bind(org_id);
        qb.push(" OR r.org_id = ");
        qb.push_bind(GLOBAL_ORG_ID);
        qb.push(") AND p.action IN (");
        {
            let mut separated = qb.separated(", ");
            for action in &query.actions {
                separated.push_bind(action.clone());
            }
        }
        qb.push(") AND p.scope IN (");
        {
            let mut separated = qb.separated(", ");
            for s in scopes {
                separated.push_bind(s);
            }
        }
        qb.push(")");
        if query.only_managed {
            qb.push(" AND r.name LIKE ");
            qb.push_bind(format!("{MANAGED_ROLE_PREFIX}%"));
        }
        qb.push(" ORDER BY r.name, b.subject_kind, b.subject_identifier, p.scope, p.action");

        let rows = qb.build().fetch_all(&self.pool).await?;

        let mut out: Vec<ResourcePermission> = Vec::new();
        let mut index: HashMap<(i64, Subject, String), usize> = HashMap::new();

        for row in &rows {
            let permission = permission_from_row(row)?;
            let subject = subject_from_row(row)?;
            let role_name: String = sqlx::Row::try_get(row, "role_name")
                .map_err(|e| AppError::internal(format!("missing role_name: {e}")))?;

            let key = (permission.role_id, subject.clone(), permission.scope.clone());
            match index.get(&key) {
                Some(&i) => {
                    let entry = &mut out[i];
                    entry.actions.push(permission.action);
                    entry.id = entry.id.min(permission.id);
                    entry.created_at = entry.created_at.min(permission.created_at);
                    entry.updated_at = entry.updated_at.max(permission.updated_at);
                }
                None => {
                    let is_target = permission.scope == target;
                    index.insert(key, out.len());
                    out.push(ResourcePermission {
                        id: permission.id,
                        is_managed: role_name.starts_with(MANAGED_ROLE_PREFIX) && is_target,
                        is_inherited: !is_target,
                        role_name,
                        actions: vec![permission.action],
                        scope: permission.scope,
                        subject: Some(subject),
                        created_at: permission.created_at,
                        updated_at: permission.updated_at,
                    });
                }
            }
        }

        for entry in &mut out {
            entry.actions.sort();
            entry.actions.dedup();
        }

        tracing::debug!(org_id, scope = %target, results = out.len(), "resource permissions loaded");
        Ok(out)
    }

    /// Every grant reaching a principal through its own, team and builtin
    /// role bindings in the org, including global roles.
    pub async fn get_user_permissions(&self, query: &UserPermissionsQuery) -> AppResult<Vec<Permission>> {
        if query.user_id.is_none() && query.team_ids.is_empty() && query.builtin_roles.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT DISTINCT p.id, p.role_id, p.action, p.scope, p.created, p.updated \
             FROM permission p \
             INNER JOIN role r ON r.id = p.role_id \
             INNER JOIN role_binding b ON b.role_id = r.id \
             WHERE (r.org_id = ",
        );
        qb.push_bind(query.org_id);
        qb.push(" OR r.org_id = ");
        qb.push_bind(GLOBAL_ORG_ID);
        qb.push(") AND (b.org_id = ");
        qb.push_bind(query.org_id);
        qb.push(" OR b.org_id = ");
        qb.push_bind(GLOBAL_ORG_ID);
        qb.push(") AND (");

        let mut first = true;
        if let Some(user_id) = query.user_id {
            qb.push("(b.subject_kind = 'user' AND b.subject_identifier = ");
            qb.push_bind(user_id.to_string());
            qb.push(")");
            first = false;
        }
        if !query.team_ids.is_empty() {
            if !first {
                qb.push(" OR ");
            }
            qb.push("(b.subject_kind = 'team' AND b.subject_identifier IN (");
            {
                let mut separated = qb.separated(", ");
                for team_id in &query.team_ids {
                    separated.push_bind(team_id.to_string());
                }
            }
            qb.push("))");
            first = false;
        }
        if !query.builtin_roles.is_empty() {
            if !first {
                qb.push(" OR ");
            }
            qb.push("(b.subject_kind = 'builtin' AND b.subject_identifier IN (");
            {
                let mut separated = qb.separated(", ");
                for role in &query.builtin_roles {
                    separated.push_bind(role.to_lowercase());
                }
            }
            qb.push("))");
        }
        qb.push(")");

        if let Some(prefix) = query.actions_prefix.as_deref().filter(|p| !p.is_empty()) {
            qb.push(" AND substr(p.action, 1, length(");
            qb.push_bind(prefix.to_string());
            qb.push(")) = ");
            qb.push_bind(prefix.to_string());
        }
        qb.push(" ORDER BY p.action, p.scope");

        let rows = qb.build().fetch_all(&self.pool).await?;
        let permissions = rows
            .iter()
            .map(permission_from_row)
            .collect::<AppResult<Vec<_>>>()?;

        tracing::debug!(
            org_id = query.org_id,
            user_id = ?query.user_id,
            grants = permissions.len(),
            "user permissions loaded"
        );
        Ok(permissions)
    }

    /// Provisions a named role with exactly `permissions` and binds it to
    /// every subject. Safe to run on every startup.
    pub async fn declare_fixed_role(
        &self,
        org_id: i64,
        role: &FixedRole,
        permissions: &[Permission],
        subjects: &[Subject],
    ) -> AppResult<Role> {
        for permission in permissions {
            scope::validate_scope(&permission.scope)?;
        }

        let mut tx = WriteTx::begin(&self.pool).await?;
        let conn = tx.conn()?;
        let stored = roles::upsert_fixed_role(
            &mut *conn,
            org_id,
            &role.name,
            role.uid.as_deref(),
            role.description.as_deref(),
        )
        .await?;

        sqlx::query("DELETE FROM permission WHERE role_id = ?")
            .bind(stored.id)
            .execute(&mut *conn)
            .await?;

        let grants: BTreeSet<(&str, &str)> = permissions
            .iter()
            .map(|p| (p.action.as_str(), p.scope.as_str()))
            .collect();
        let now = Utc::now().to_rfc3339();
        for (action, granted) in &grants {
            insert_permission(&mut *conn, stored.id, action, granted, &now).await?;
        }

        for subject in subjects {
            roles::ensure_bound(&mut *conn, org_id, stored.id, subject).await?;
        }

        tx.commit().await?;
        tracing::info!(
            org_id,
            role = %stored.name,
            grants = grants.len(),
            subjects = subjects.len(),
            "fixed role declared"
        );
        Ok(stored)
    }
}

async fn insert_permission(
    conn: &mut SqliteConnection,
    role_id: i64,
    action: &str,
    granted: &str,
    now: &str,
) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO permission (role_id, action, scope, created, updated) VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT (role_id, action, scope) DO NOTHING",
    )
    .bind(role_id)
    .bind(action)
    .bind(granted)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn permissions_at(conn: &mut SqliteConnection, role_id: i64, target: &str) -> AppResult<Vec<Permission>> {
    let rows = sqlx::query(&format!(
        "SELECT {PERMISSION_COLUMNS} FROM permission WHERE role_id = ? AND scope = ? ORDER BY action"
    ))
    .bind(role_id)
    .bind(target)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(permission_from_row).collect()
}

/// Brings the subject's managed role to exactly `command.actions` at the
/// command's scope.
async fn converge(
    conn: &mut SqliteConnection,
    org_id: i64,
    subject: &Subject,
    command: &SetResourcePermissionCommand,
) -> AppResult<ResourcePermission> {
    let target = command.scope();
    scope::validate_scope(&target)?;

    let role = roles::get_or_create_managed_role(conn, org_id, subject).await?;
    let current = permissions_at(conn, role.id, &target).await?;

    let desired: BTreeSet<&str> = command
        .actions
        .iter()
        .map(String::as_str)
        .filter(|a| !a.is_empty())
        .collect();
    let granted: BTreeSet<&str> = current.iter().map(|p| p.action.as_str()).collect();

    let remove: Vec<i64> = current
        .iter()
        .filter(|p| !desired.contains(p.action.as_str()))
        .map(|p| p.id)
        .collect();
    let missing: Vec<&str> = desired.difference(&granted).copied().collect();

    for id in &remove {
        sqlx::query("DELETE FROM permission WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
    }

    let now = Utc::now().to_rfc3339();
    for action in &missing {
        insert_permission(conn, role.id, action, &target, &now).await?;
    }

    tracing::info!(
        org_id,
        subject = %subject,
        scope = %target,
        removed = remove.len(),
        added = missing.len(),
        "resource permission converged"
    );

    let granted = permissions_at(conn, role.id, &target).await?;
    let Some(first) = granted.first() else {
        return Ok(ResourcePermission::empty(role.name, target, subject.clone()));
    };

    Ok(ResourcePermission {
        id: granted.iter().map(|p| p.id).min().unwrap_or(first.id),
        role_name: role.name,
        actions: granted.iter().map(|p| p.action.clone()).collect(),
        scope: target,
        subject: Some(subject.clone()),
        is_managed: true,
        is_inherited: false,
        created_at: granted.iter().map(|p| p.created_at).min().unwrap_or(first.created_at),
        updated_at: granted.iter().map(|p| p.updated_at).max().unwrap_or(first.updated_at),
    })
}
