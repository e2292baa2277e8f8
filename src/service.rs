use std::sync::Arc;

use moka::future::Cache;

use crate::authz::{Principal, PrincipalKind};
use crate::config::Config;
use crate::errors::AppResult;
use crate::models::rbac::PermissionSet;
use crate::models::resource_permission::UserPermissionsQuery;
use crate::scope;
use crate::store::ResourcePermissionStore;

const CACHE_CAPACITY: u64 = 10_000;

type CacheKey = (i64, PrincipalKind, i64);

/// Loads principal permission sets from the store and caches them per
/// (org, principal). Nothing invalidates entries automatically: callers
/// pass `reload` or call [`PermissionService::invalidate`] after changing grants.
#[derive(Clone)]
pub struct PermissionService {
    store: ResourcePermissionStore,
    cache: Cache<CacheKey, Arc<PermissionSet>>,
}

impl PermissionService {
    pub fn new(store: ResourcePermissionStore, config: &Config) -> Self {
        Self {
            store,
            cache: Cache::builder()
                .max_capacity(CACHE_CAPACITY)
                .time_to_live(config.permission_cache_ttl)
                .build(),
        }
    }

    pub fn store(&self) -> &ResourcePermissionStore {
        &self.store
    }

    /// Fills `principal`'s permission set for its current org.
    pub async fn load(
        &self,
        principal: &mut Principal,
        team_ids: &[i64],
        builtin_roles: &[String],
        reload: bool,
    ) -> AppResult<Arc<PermissionSet>> {
        let key = cache_key(principal);

        if !reload {
            if let Some(cached) = self.cache.get(&key).await {
                principal.set_permissions(principal.org_id, cached.clone());
                return Ok(cached);
            }
        }

        let mut teams = team_ids.to_vec();
        let user_id = match principal.kind {
            PrincipalKind::Team => {
                teams.push(principal.id);
                None
            }
            _ => Some(principal.id),
        };

        let query = UserPermissionsQuery {
            org_id: principal.org_id,
            user_id,
            team_ids: teams,
            builtin_roles: builtin_roles.to_vec(),
            actions_prefix: None,
        };
        let permissions = self.store.get_user_permissions(&query).await?;
        for permission in permissions.iter().filter(|p| !scope::is_valid(&p.scope)) {
            tracing::warn!(
                principal = %principal,
                action = %permission.action,
                scope = %permission.scope,
                "granted scope is not valid and only matches literally"
            );
        }
        let set = Arc::new(PermissionSet::from_permissions(&permissions));

        tracing::debug!(
            principal = %principal,
            org_id = principal.org_id,
            grants = set.scope_count(),
            reload,
            "permission set loaded"
        );

        self.cache.insert(key, set.clone()).await;
        principal.set_permissions(principal.org_id, set.clone());
        Ok(set)
    }

    pub async fn invalidate(&self, principal: &Principal) {
        self.cache.invalidate(&cache_key(principal)).await;
    }
}

fn cache_key(principal: &Principal) -> CacheKey {
    (principal.org_id, principal.kind, principal.id)
}
