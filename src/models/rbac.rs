use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// Name prefix of every system-created per-subject role.
pub const MANAGED_ROLE_PREFIX: &str = "managed:";

/// Roles stored under this org id apply to every org they are bound in.
pub const GLOBAL_ORG_ID: i64 = 0;

// =============================================================================
// ROLE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: i64,
    pub org_id: i64,
    pub name: String,
    pub uid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    pub fn is_managed(&self) -> bool {
        self.name.starts_with(MANAGED_ROLE_PREFIX)
    }
}

/// A named, non-managed role provisioned at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedRole {
    pub name: String,
    /// Generated when absent.
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl FixedRole {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

// =============================================================================
// PERMISSION
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: i64,
    pub role_id: i64,
    pub action: String,
    pub scope: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Permission {
    /// An unsaved grant, used for provisioning and for building permission sets.
    pub fn new(action: impl Into<String>, scope: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            role_id: 0,
            action: action.into(),
            scope: scope.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

// =============================================================================
// SUBJECT / ROLE BINDING
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    User,
    Team,
    #[serde(rename = "builtin")]
    BuiltInRole,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::User => "user",
            SubjectKind::Team => "team",
            SubjectKind::BuiltInRole => "builtin",
        }
    }
}

impl FromStr for SubjectKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(SubjectKind::User),
            "team" => Ok(SubjectKind::Team),
            "builtin" => Ok(SubjectKind::BuiltInRole),
            other => Err(AppError::internal(format!("unknown subject kind: {other}"))),
        }
    }
}

/// Who a role is bound to.
///
/// Builtin role names are case-insensitive: bindings and managed roles are
/// keyed by the lower-cased name. Build them with [`Subject::builtin`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "identifier", rename_all = "lowercase")]
pub enum Subject {
    User(i64),
    Team(i64),
    #[serde(rename = "builtin")]
    BuiltInRole(String),
}

impl Subject {
    pub fn builtin(role: impl AsRef<str>) -> Self {
        Subject::BuiltInRole(role.as_ref().to_lowercase())
    }

    pub fn from_parts(kind: SubjectKind, identifier: &str) -> Result<Self, AppError> {
        let parse_id = |value: &str| {
            value
                .parse::<i64>()
                .map_err(|_| AppError::internal(format!("invalid {} id: {value}", kind.as_str())))
        };
        match kind {
            SubjectKind::User => Ok(Subject::User(parse_id(identifier)?)),
            SubjectKind::Team => Ok(Subject::Team(parse_id(identifier)?)),
            SubjectKind::BuiltInRole => Ok(Subject::builtin(identifier)),
        }
    }

    pub fn kind(&self) -> SubjectKind {
        match self {
            Subject::User(_) => SubjectKind::User,
            Subject::Team(_) => SubjectKind::Team,
            Subject::BuiltInRole(_) => SubjectKind::BuiltInRole,
        }
    }

    pub fn identifier(&self) -> String {
        match self {
            Subject::User(id) | Subject::Team(id) => id.to_string(),
            Subject::BuiltInRole(role) => role.to_lowercase(),
        }
    }

    /// `managed:<kind>s:<identifier>:permissions`.
    pub fn managed_role_name(&self) -> String {
        format!(
            "{MANAGED_ROLE_PREFIX}{}s:{}:permissions",
            self.kind().as_str(),
            self.identifier()
        )
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind().as_str(), self.identifier())
    }
}

/// Parses `user:1`, `team:2` or `builtin:Editor`.
impl FromStr for Subject {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, identifier) = s
            .split_once(':')
            .ok_or_else(|| AppError::internal(format!("subject must be <kind>:<identifier>, got {s}")))?;
        Subject::from_parts(kind.parse()?, identifier)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleBinding {
    pub id: i64,
    pub org_id: i64,
    pub role_id: i64,
    pub subject: Subject,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// PERMISSION SET (computed)
// =============================================================================

/// A principal's granted scopes per action within one org.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet(HashMap<String, Vec<String>>);

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_permissions<'a>(permissions: impl IntoIterator<Item = &'a Permission>) -> Self {
        permissions
            .into_iter()
            .map(|p| (p.action.clone(), p.scope.clone()))
            .collect()
    }

    pub fn insert(&mut self, action: impl Into<String>, scope: impl Into<String>) {
        let scopes = self.0.entry(action.into()).or_default();
        let scope = scope.into();
        if !scopes.contains(&scope) {
            scopes.push(scope);
        }
    }

    pub fn scopes(&self, action: &str) -> Option<&[String]> {
        self.0.get(action).map(Vec::as_slice)
    }

    pub fn contains_action(&self, action: &str) -> bool {
        self.0.contains_key(action)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }

    /// Total number of (action, scope) grants.
    pub fn scope_count(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<HashMap<String, Vec<String>>> for PermissionSet {
    fn from(value: HashMap<String, Vec<String>>) -> Self {
        Self(value)
    }
}

impl<A: Into<String>, S: Into<String>> FromIterator<(A, S)> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = (A, S)>>(iter: I) -> Self {
        let mut grouped: HashMap<String, BTreeSet<String>> = HashMap::new();
        for (action, scope) in iter {
            grouped.entry(action.into()).or_default().insert(scope.into());
        }
        Self(
            grouped
                .into_iter()
                .map(|(action, scopes)| (action, scopes.into_iter().collect()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn managed_role_names_are_deterministic() {
        assert_eq!(Subject::User(7).managed_role_name(), "managed:users:7:permissions");
        assert_eq!(Subject::Team(3).managed_role_name(), "managed:teams:3:permissions");
        assert_eq!(
            Subject::BuiltInRole("Editor".into()).managed_role_name(),
            "managed:builtins:editor:permissions"
        );
    }

    #[test]
    fn builtin_identifiers_ignore_case() {
        let upper = Subject::BuiltInRole("Editor".into());
        let lower = Subject::builtin("editor");
        assert_eq!(upper.identifier(), "editor");
        assert_eq!(upper.identifier(), lower.identifier());
        assert_eq!(upper.managed_role_name(), lower.managed_role_name());
        assert_eq!(Subject::builtin("EDITOR"), lower);
        assert_eq!(upper.to_string(), "builtin:editor");
    }

    #[test]
    fn subjects_parse_from_kind_and_identifier() {
        assert_eq!("user:1".parse::<Subject>().unwrap(), Subject::User(1));
        assert_eq!("team:22".parse::<Subject>().unwrap(), Subject::Team(22));
        assert_eq!(
            "builtin:Viewer".parse::<Subject>().unwrap(),
            Subject::BuiltInRole("viewer".into())
        );
        assert!("user:abc".parse::<Subject>().is_err());
        assert!("robot:1".parse::<Subject>().is_err());
        assert!("user".parse::<Subject>().is_err());
    }

    #[test]
    fn permission_set_groups_and_dedups_scopes() {
        let set: PermissionSet = [
            ("dashboards:read", "dashboards:uid:1"),
            ("dashboards:read", "dashboards:uid:1"),
            ("dashboards:read", "dashboards:uid:2"),
            ("teams:write", "teams:*"),
        ]
        .into_iter()
        .collect();

        assert_eq!(set.scopes("dashboards:read").map(<[String]>::len), Some(2));
        assert_eq!(set.scope_count(), 3);
        assert!(set.contains_action("teams:write"));
        assert!(set.scopes("folders:read").is_none());
    }
}
