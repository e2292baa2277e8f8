//! Scope resolvers.
//!
//! Keyword resolvers turn a fixed scope such as `users:self` into a concrete
//! one using the calling principal. Attribute resolvers are registered per
//! scope prefix and translate an identifier the API received into the one
//! grants are stored under (`dashboards:id:7` → `dashboards:uid:xyz`); they
//! may do I/O, so their results go through a read-through cache.
//!
//! Registration happens on a [`RegistryBuilder`]; [`RegistryBuilder::freeze`]
//! yields the immutable [`Registry`] used on the request path.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;

use crate::errors::{AppError, AppResult};
use crate::scope;

use super::principal::Principal;

pub const USERS_SELF: &str = "users:self";
pub const ORGS_CURRENT: &str = "orgs:current";

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);
const CACHE_CAPACITY: u64 = 10_000;

/// Translates a scope under a registered prefix into the equivalent stored scopes.
///
/// Returning [`AppError::NotFound`] means the referenced resource does not
/// exist; evaluation then treats the scope as unresolved and denies.
#[async_trait]
pub trait ScopeAttributeResolver: Send + Sync {
    async fn resolve(&self, org_id: i64, scope: &str) -> AppResult<Vec<String>>;
}

/// Rewrites a keyword scope from the calling principal, without I/O.
pub trait ScopeKeywordResolver: Send + Sync {
    fn resolve(&self, principal: &Principal) -> AppResult<String>;
}

impl<F> ScopeKeywordResolver for F
where
    F: Fn(&Principal) -> AppResult<String> + Send + Sync,
{
    fn resolve(&self, principal: &Principal) -> AppResult<String> {
        self(principal)
    }
}

pub struct RegistryBuilder {
    keywords: HashMap<String, Arc<dyn ScopeKeywordResolver>>,
    attributes: HashMap<String, Arc<dyn ScopeAttributeResolver>>,
    cache_ttl: Duration,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryBuilder {
    /// A builder with the `users:self` and `orgs:current` keywords registered.
    pub fn new() -> Self {
        let mut keywords: HashMap<String, Arc<dyn ScopeKeywordResolver>> = HashMap::new();
        keywords.insert(
            USERS_SELF.to_string(),
            Arc::new(|p: &Principal| -> AppResult<String> {
                Ok(scope::build(&["users", "id", &p.id.to_string()]))
            }),
        );
        keywords.insert(
            ORGS_CURRENT.to_string(),
            Arc::new(|p: &Principal| -> AppResult<String> {
                Ok(scope::build(&["orgs", "id", &p.org_id.to_string()]))
            }),
        );

        Self {
            keywords,
            attributes: HashMap::new(),
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn register_keyword_resolver(
        &mut self,
        keyword: &str,
        resolver: impl ScopeKeywordResolver + 'static,
    ) -> AppResult<()> {
        scope::validate_scope(keyword)?;
        if self.keywords.contains_key(keyword) {
            return Err(AppError::configuration(format!(
                "keyword resolver already registered for {keyword}"
            )));
        }
        self.keywords.insert(keyword.to_string(), Arc::new(resolver));
        Ok(())
    }

    /// Registers a resolver for every scope starting with `prefix`, e.g. `dashboards:id:`.
    pub fn register_scope_attribute_resolver(
        &mut self,
        prefix: &str,
        resolver: impl ScopeAttributeResolver + 'static,
    ) -> AppResult<()> {
        scope::validate_scope(prefix)?;
        if !prefix.ends_with(':') || scope::scope_prefix(prefix) != prefix {
            return Err(AppError::invalid_scope(format!(
                "resolver prefix must look like <resource>:<attribute>:, got {prefix}"
            )));
        }
        if self.attributes.contains_key(prefix) {
            return Err(AppError::configuration(format!(
                "attribute resolver already registered for {prefix}"
            )));
        }
        self.attributes.insert(prefix.to_string(), Arc::new(resolver));
        Ok(())
    }

    pub fn freeze(self) -> Registry {
        tracing::debug!(
            keywords = self.keywords.len(),
            attributes = self.attributes.len(),
            "scope resolver registry frozen"
        );
        Registry {
            keywords: self.keywords,
            attributes: self.attributes,
            cache: Cache::builder()
                .max_capacity(CACHE_CAPACITY)
                .time_to_live(self.cache_ttl)
                .build(),
        }
    }
}

pub struct Registry {
    keywords: HashMap<String, Arc<dyn ScopeKeywordResolver>>,
    attributes: HashMap<String, Arc<dyn ScopeAttributeResolver>>,
    /// Resolved attribute scopes per (org id, scope).
    cache: Cache<(i64, String), Arc<Vec<String>>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("keywords", &self.keywords.keys().collect::<Vec<_>>())
            .field("attributes", &self.attributes.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Registry {
    pub fn has_attribute_resolver(&self, prefix: &str) -> bool {
        self.attributes.contains_key(prefix)
    }

    /// Resolves one scope: keyword first, then attribute.
    ///
    /// `Ok(None)` means nothing applied to the scope. An attribute resolver
    /// answering with no scopes counts as not found.
    pub async fn resolve(&self, principal: &Principal, target: &str) -> AppResult<Option<Vec<String>>> {
        let keyword = match self.keywords.get(target) {
            Some(resolver) => Some(resolver.resolve(principal)?),
            None => None,
        };
        let target = keyword.as_deref().unwrap_or(target);

        match self.resolve_attribute(principal.org_id, target).await? {
            Some(scopes) => Ok(Some(scopes)),
            None => Ok(keyword.map(|k| vec![k])),
        }
    }

    async fn resolve_attribute(&self, org_id: i64, target: &str) -> AppResult<Option<Vec<String>>> {
        let prefix = scope::scope_prefix(target);
        let Some(resolver) = self.attributes.get(&prefix) else {
            return Ok(None);
        };

        let key = (org_id, target.to_string());
        if let Some(cached) = self.cache.get(&key).await {
            return Ok(Some(cached.as_ref().clone()));
        }

        match resolver.resolve(org_id, target).await {
            Ok(scopes) if scopes.is_empty() => {
                tracing::debug!(org_id, scope = %target, "scope resolved to nothing");
                Ok(None)
            }
            Ok(scopes) => {
                tracing::debug!(org_id, scope = %target, resolved = ?scopes, "scope resolved");
                self.cache.insert(key, Arc::new(scopes.clone())).await;
                Ok(Some(scopes))
            }
            Err(AppError::NotFound(message)) => {
                tracing::debug!(org_id, scope = %target, %message, "scope target not found");
                Ok(None)
            }
            Err(err @ AppError::Resolution(_)) => Err(err),
            Err(err) => Err(AppError::resolution(format!("{target}: {err}"))),
        }
    }

    /// Drops every cached resolution. Callers invoke this when identifiers are remapped.
    pub fn invalidate_cache(&self) {
        self.cache.invalidate_all();
    }
}
