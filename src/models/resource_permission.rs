use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::rbac::Subject;
use crate::scope;

/// Desired state of one subject's grant on one resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetResourcePermissionCommand {
    /// Desired actions; empty revokes everything at the scope.
    pub actions: Vec<String>,
    pub resource: String,
    pub resource_id: String,
    pub resource_attribute: String,
}

impl SetResourcePermissionCommand {
    pub fn scope(&self) -> String {
        scope::build(&[&self.resource, &self.resource_attribute, &self.resource_id])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetResourcePermissionsCommand {
    pub subject: Subject,
    pub command: SetResourcePermissionCommand,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetResourcePermissionsQuery {
    pub actions: Vec<String>,
    pub resource: String,
    pub resource_id: String,
    pub resource_attribute: String,
    pub only_managed: bool,
    /// Extra scopes whose grants flow down to this resource, e.g. its parent folder.
    #[serde(default)]
    pub inherited_scopes: Vec<String>,
}

impl GetResourcePermissionsQuery {
    pub fn scope(&self) -> String {
        scope::build(&[&self.resource, &self.resource_attribute, &self.resource_id])
    }
}

/// The actions one role grants one subject on one scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePermission {
    pub id: i64,
    pub role_name: String,
    pub actions: Vec<String>,
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<Subject>,
    pub is_managed: bool,
    pub is_inherited: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResourcePermission {
    /// Result of converging to no actions: no grant, not an error.
    pub fn empty(role_name: impl Into<String>, scope: impl Into<String>, subject: Subject) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            role_name: role_name.into(),
            actions: Vec::new(),
            scope: scope.into(),
            subject: Some(subject),
            is_managed: true,
            is_inherited: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn contains(&self, action: &str) -> bool {
        self.actions.iter().any(|a| a == action)
    }
}

/// Which bindings contribute to a principal's permission set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserPermissionsQuery {
    pub org_id: i64,
    pub user_id: Option<i64>,
    pub team_ids: Vec<i64>,
    pub builtin_roles: Vec<String>,
    /// Only return actions starting with this prefix.
    pub actions_prefix: Option<String>,
}
