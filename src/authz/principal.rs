use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::models::rbac::PermissionSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    User,
    ApiKey,
    ServiceAccount,
    Team,
}

impl PrincipalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrincipalKind::User => "user",
            PrincipalKind::ApiKey => "api-key",
            PrincipalKind::ServiceAccount => "service-account",
            PrincipalKind::Team => "team",
        }
    }
}

/// Principal represents the authenticated caller with its cached permissions
#[derive(Debug, Clone)]
pub struct Principal {
    pub kind: PrincipalKind,
    pub id: i64,
    /// The org the current request acts in.
    pub org_id: i64,
    /// Permission sets per org, loaded once per session.
    pub permissions: HashMap<i64, Arc<PermissionSet>>,
}

impl Principal {
    pub fn new(kind: PrincipalKind, id: i64, org_id: i64) -> Self {
        Self {
            kind,
            id,
            org_id,
            permissions: HashMap::new(),
        }
    }

    pub fn user(id: i64, org_id: i64) -> Self {
        Self::new(PrincipalKind::User, id, org_id)
    }

    pub fn with_permissions(mut self, org_id: i64, permissions: PermissionSet) -> Self {
        self.set_permissions(org_id, Arc::new(permissions));
        self
    }

    pub fn set_permissions(&mut self, org_id: i64, permissions: Arc<PermissionSet>) {
        self.permissions.insert(org_id, permissions);
    }

    /// The permission set for the current org, if one has been loaded.
    pub fn permissions(&self) -> Option<&PermissionSet> {
        self.permissions.get(&self.org_id).map(Arc::as_ref)
    }

    pub fn has_action(&self, action: &str) -> bool {
        self.permissions()
            .map(|p| p.contains_action(action))
            .unwrap_or(false)
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}
