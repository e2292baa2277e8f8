//! Role and role-binding primitives shared by the converge path and
//! fixed-role provisioning. Everything here runs on a caller-owned
//! connection so it composes into the caller's transaction.

use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::db::row_parsers::role_from_row;
use crate::errors::{AppError, AppResult};
use crate::models::rbac::{Role, Subject, MANAGED_ROLE_PREFIX};

const ROLE_COLUMNS: &str = "id, org_id, name, uid, description, created, updated";

/// `managed_` followed by the first 32 hex chars of SHA-256(`<org_id>:<name>`).
pub fn managed_role_uid(org_id: i64, name: &str) -> String {
    let digest = Sha256::digest(format!("{org_id}:{name}").as_bytes());
    let encoded = hex::encode(digest);
    format!("managed_{}", &encoded[..32])
}

pub(crate) async fn find_role(
    conn: &mut SqliteConnection,
    org_id: i64,
    name: &str,
) -> AppResult<Option<Role>> {
    let row = sqlx::query(&format!(
        "SELECT {ROLE_COLUMNS} FROM role WHERE org_id = ? AND name = ?"
    ))
    .bind(org_id)
    .bind(name)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(role_from_row).transpose()
}

/// Inserts the role unless one with the same name already exists in the org,
/// then returns the stored row.
pub(crate) async fn create_role(
    conn: &mut SqliteConnection,
    org_id: i64,
    name: &str,
    uid: &str,
    description: Option<&str>,
) -> AppResult<Role> {
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        "INSERT INTO role (org_id, name, uid, description, created, updated) \
         VALUES (?, ?, ?, ?, ?, ?) ON CONFLICT (org_id, name) DO NOTHING",
    )
    .bind(org_id)
    .bind(name)
    .bind(uid)
    .bind(description)
    .bind(&now)
    .bind(&now)
    .execute(&mut *conn)
    .await?;

    find_role(conn, org_id, name)
        .await?
        .ok_or_else(|| AppError::internal(format!("role {name} missing after insert")))
}

/// Binds a role to a subject in the org.
///
/// An existing binding is reported as [`AppError::AlreadyBound`] instead of
/// surfacing the unique constraint failure.
pub(crate) async fn bind_role(
    conn: &mut SqliteConnection,
    org_id: i64,
    role_id: i64,
    subject: &Subject,
) -> AppResult<()> {
    let kind = subject.kind().as_str();
    let identifier = subject.identifier();

    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM role_binding \
         WHERE org_id = ? AND role_id = ? AND subject_kind = ? AND subject_identifier = ?)",
    )
    .bind(org_id)
    .bind(role_id)
    .bind(kind)
    .bind(&identifier)
    .fetch_one(&mut *conn)
    .await?;

    if exists {
        return Err(AppError::already_bound(format!("role {role_id} to {subject}")));
    }

    sqlx::query(
        "INSERT INTO role_binding (org_id, role_id, subject_kind, subject_identifier, created) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(org_id)
    .bind(role_id)
    .bind(kind)
    .bind(&identifier)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Like [`bind_role`], but an existing binding counts as success.
pub(crate) async fn ensure_bound(
    conn: &mut SqliteConnection,
    org_id: i64,
    role_id: i64,
    subject: &Subject,
) -> AppResult<()> {
    match bind_role(conn, org_id, role_id, subject).await {
        Err(AppError::AlreadyBound(message)) => {
            tracing::warn!(org_id, role_id, subject = %subject, %message, "binding already present");
            Ok(())
        }
        other => other,
    }
}

/// The subject's managed role in the org, created and bound on first use.
pub(crate) async fn get_or_create_managed_role(
    conn: &mut SqliteConnection,
    org_id: i64,
    subject: &Subject,
) -> AppResult<Role> {
    let name = subject.managed_role_name();
    if let Some(role) = find_role(conn, org_id, &name).await? {
        return Ok(role);
    }

    let uid = managed_role_uid(org_id, &name);
    let role = create_role(conn, org_id, &name, &uid, None).await?;
    tracing::info!(org_id, role = %role.name, uid = %role.uid, "managed role created");

    ensure_bound(conn, org_id, role.id, subject).await?;
    Ok(role)
}

/// Creates or updates a non-managed role, returning the stored row.
pub(crate) async fn upsert_fixed_role(
    conn: &mut SqliteConnection,
    org_id: i64,
    name: &str,
    uid: Option<&str>,
    description: Option<&str>,
) -> AppResult<Role> {
    if name.starts_with(MANAGED_ROLE_PREFIX) {
        return Err(AppError::configuration(format!(
            "fixed role {name} must not use the {MANAGED_ROLE_PREFIX} prefix"
        )));
    }

    if find_role(conn, org_id, name).await?.is_some() {
        sqlx::query("UPDATE role SET description = ?, updated = ? WHERE org_id = ? AND name = ?")
            .bind(description)
            .bind(Utc::now().to_rfc3339())
            .bind(org_id)
            .bind(name)
            .execute(&mut *conn)
            .await?;

        return find_role(conn, org_id, name)
            .await?
            .ok_or_else(|| AppError::internal(format!("role {name} missing after update")));
    }

    let uid = uid
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let role = create_role(conn, org_id, name, &uid, description).await?;
    tracing::info!(org_id, role = %role.name, uid = %role.uid, "fixed role created");
    Ok(role)
}
