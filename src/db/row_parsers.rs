use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::errors::AppError;
use crate::models::rbac::{Permission, Role, Subject, SubjectKind};

pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, AppError> {
    let s = s.trim();

    // Try RFC3339 first (e.g. 2025-11-19T12:34:56Z)
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // SQLite default timestamp format: "YYYY-MM-DD HH:MM:SS" (with optional fractional seconds)
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    if let Ok(naive_date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let ndt = naive_date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| AppError::internal("invalid datetime: date out of range"))?;
        return Ok(Utc.from_utc_datetime(&ndt));
    }

    Err(AppError::internal(format!("invalid datetime: {}", s)))
}

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, AppError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name)
        .map_err(|e| AppError::internal(format!("missing {}: {}", name, e)))
}

pub fn role_from_row(row: &SqliteRow) -> Result<Role, AppError> {
    let created_at_s: String = column(row, "created")?;
    let updated_at_s: String = column(row, "updated")?;

    Ok(Role {
        id: column(row, "id")?,
        org_id: column(row, "org_id")?,
        name: column(row, "name")?,
        uid: column(row, "uid")?,
        description: column(row, "description")?,
        created_at: parse_datetime(&created_at_s)?,
        updated_at: parse_datetime(&updated_at_s)?,
    })
}

pub fn permission_from_row(row: &SqliteRow) -> Result<Permission, AppError> {
    let created_at_s: String = column(row, "created")?;
    let updated_at_s: String = column(row, "updated")?;

    Ok(Permission {
        id: column(row, "id")?,
        role_id: column(row, "role_id")?,
        action: column(row, "action")?,
        scope: column(row, "scope")?,
        created_at: parse_datetime(&created_at_s)?,
        updated_at: parse_datetime(&updated_at_s)?,
    })
}

pub fn subject_from_row(row: &SqliteRow) -> Result<Subject, AppError> {
    let kind: String = column(row, "subject_kind")?;
    let identifier: String = column(row, "subject_identifier")?;
    Subject::from_parts(kind.parse::<SubjectKind>()?, &identifier)
}
