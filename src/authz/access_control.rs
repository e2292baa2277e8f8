use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::Config;
use crate::errors::{AppError, AppResult};
use crate::scope;

use super::evaluator::Evaluator;
use super::principal::Principal;
use super::resolvers::Registry;
use super::trie::{Metadata, ScopeTrie};
use super::AuthzMode;

/// Predicate over a scope for one fixed action.
pub type ScopeChecker = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Maps a resource identifier to the actions the principal may perform on it.
pub type MetadataFn = Box<dyn Fn(&str) -> Metadata + Send + Sync>;

/// Entry point for authorization decisions.
///
/// Evaluation order:
/// 1. no permission set for the principal's org -> deny
/// 2. the evaluator as given -> allow on success
/// 3. the evaluator with scopes rewritten by the resolvers -> result
#[derive(Debug, Clone)]
pub struct AccessControl {
    registry: Arc<Registry>,
    mode: AuthzMode,
    trie_threshold: usize,
}

impl AccessControl {
    pub fn new(registry: Registry, config: &Config) -> Self {
        Self {
            registry: Arc::new(registry),
            mode: config.mode,
            trie_threshold: config.trie_threshold,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn mode(&self) -> AuthzMode {
        self.mode
    }

    pub async fn evaluate(&self, principal: &Principal, evaluator: &Evaluator) -> AppResult<bool> {
        let Some(permissions) = principal.permissions() else {
            tracing::debug!(
                principal = %principal,
                org_id = principal.org_id,
                "no permissions loaded for org"
            );
            return Ok(false);
        };

        if evaluator.evaluate(permissions) {
            tracing::debug!(principal = %principal, evaluator = %evaluator, "access granted");
            return Ok(true);
        }

        let Some(resolved) = evaluator.resolve(&self.registry, principal).await? else {
            tracing::debug!(principal = %principal, evaluator = %evaluator, "access denied");
            return Ok(false);
        };

        let allowed = resolved.evaluate(permissions);
        tracing::debug!(
            principal = %principal,
            evaluator = %evaluator,
            resolved = %resolved,
            allowed,
            "evaluated resolved scopes"
        );
        Ok(allowed)
    }

    /// Evaluates and applies the enforcement mode.
    pub async fn require(&self, principal: &Principal, evaluator: &Evaluator) -> AppResult<()> {
        if self.mode == AuthzMode::Off {
            return Ok(());
        }

        if self.evaluate(principal, evaluator).await? {
            return Ok(());
        }

        match self.mode {
            AuthzMode::Advisory => {
                tracing::warn!(
                    principal = %principal,
                    evaluator = %evaluator,
                    "access would be denied (advisory mode)"
                );
                Ok(())
            }
            _ => Err(AppError::forbidden(format!("{principal} may not {evaluator}"))),
        }
    }

    /// Builds a reusable predicate telling whether `action` is granted on a scope.
    ///
    /// A wildcard covering any of `prefixes` makes the predicate always true.
    /// `prefixes` does not restrict the predicate: other granted scopes, nested
    /// wildcards such as `folders:uid:f/*` included, still match scopes outside
    /// the prefixes. Callers listing one kind of resource only pass scopes of
    /// that kind.
    pub fn checker(&self, principal: &Principal, action: &str, prefixes: &[&str]) -> ScopeChecker {
        let Some(granted) = principal.permissions().and_then(|p| p.scopes(action)) else {
            return Box::new(|_: &str| false);
        };

        let wildcards = scope::wildcards_from_prefixes(prefixes);
        if granted.iter().any(|s| wildcards.contains(s)) {
            return Box::new(|_: &str| true);
        }

        let mut literal: HashSet<String> = HashSet::with_capacity(granted.len());
        let mut nested: Vec<String> = Vec::new();
        for s in granted {
            if scope::wildcard_prefix(s).is_some() {
                nested.push(s.clone());
            } else {
                literal.insert(s.clone());
            }
        }

        Box::new(move |target: &str| {
            literal.contains(target) || nested.iter().any(|g| scope::matches(g, target))
        })
    }

    /// Builds a function annotating resources with the actions the principal
    /// may perform on them. The resource's scopes are each prefix followed by
    /// the identifier passed to the function.
    pub fn metadata(&self, principal: &Principal, prefixes: &[&str]) -> MetadataFn {
        let Some(permissions) = principal.permissions() else {
            return Box::new(|_: &str| Metadata::new());
        };
        let prefixes: Vec<String> = prefixes.iter().map(|p| p.to_string()).collect();

        if permissions.scope_count() >= self.trie_threshold {
            let trie = ScopeTrie::from_permission_set(permissions);
            tracing::debug!(grants = trie.len(), "metadata indexed through scope trie");
            return Box::new(move |id: &str| {
                let mut out = Metadata::new();
                for prefix in &prefixes {
                    out.extend(trie.metadata(&format!("{prefix}{id}")));
                }
                out
            });
        }

        let wildcards = scope::wildcards_from_prefixes(prefixes.as_slice());
        let mut everywhere: Vec<String> = Vec::new();
        let mut literal: HashMap<String, Vec<String>> = HashMap::new();
        let mut nested: Vec<(String, String)> = Vec::new();

        for (action, scopes) in permissions.iter() {
            if scopes.iter().any(|s| wildcards.contains(s)) {
                everywhere.push(action.clone());
                continue;
            }
            for s in scopes {
                if scope::wildcard_prefix(s).is_some() {
                    nested.push((action.clone(), s.clone()));
                } else {
                    literal.entry(s.clone()).or_default().push(action.clone());
                }
            }
        }

        Box::new(move |id: &str| {
            let mut out: Metadata = everywhere.iter().map(|a| (a.clone(), true)).collect();
            for prefix in &prefixes {
                let target = format!("{prefix}{id}");
                if let Some(actions) = literal.get(&target) {
                    out.extend(actions.iter().map(|a| (a.clone(), true)));
                }
                for (action, granted) in &nested {
                    if scope::matches(granted, &target) {
                        out.insert(action.clone(), true);
                    }
                }
            }
            out
        })
    }

    /// Metadata for each id under `prefix`; ids without any granted action are omitted.
    pub fn resources_metadata<I, S>(
        &self,
        principal: &Principal,
        prefix: &str,
        ids: I,
    ) -> HashMap<String, Metadata>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let metadata = self.metadata(principal, &[prefix]);
        ids.into_iter()
            .filter_map(|id| {
                let id = id.as_ref();
                let actions = metadata(id);
                (!actions.is_empty()).then(|| (id.to_string(), actions))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::resolvers::RegistryBuilder;
    use crate::models::rbac::PermissionSet;

    fn access_control(mode: AuthzMode) -> AccessControl {
        let config = Config {
            mode,
            ..Config::default()
        };
        AccessControl::new(RegistryBuilder::new().freeze(), &config)
    }

    fn principal(grants: &[(&str, &str)]) -> Principal {
        let set: PermissionSet = grants.iter().copied().collect();
        Principal::user(1, 1).with_permissions(1, set)
    }

    #[tokio::test]
    async fn test_no_permissions_for_org_denies() {
        let ac = access_control(AuthzMode::Strict);
        let principal = Principal::user(1, 2);
        let allowed = ac
            .evaluate(&principal, &Evaluator::action("teams:read"))
            .await
            .unwrap();
        assert!(!allowed);
    }

    #[tokio::test]
    async fn test_keyword_scope_resolves_to_own_id() {
        let ac = access_control(AuthzMode::Strict);
        let principal = principal(&[("users:read", "users:id:1")]);

        let own = Evaluator::permission("users:read", ["users:self"]);
        assert!(ac.evaluate(&principal, &own).await.unwrap());

        let other = Evaluator::permission("users:read", ["users:id:2"]);
        assert!(!ac.evaluate(&principal, &other).await.unwrap());
    }

    #[tokio::test]
    async fn test_require_honours_mode() {
        let principal = principal(&[]);
        let eval = Evaluator::action("teams:write");

        let err = access_control(AuthzMode::Strict)
            .require(&principal, &eval)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        assert!(access_control(AuthzMode::Advisory).require(&principal, &eval).await.is_ok());
        assert!(access_control(AuthzMode::Off).require(&principal, &eval).await.is_ok());
    }

    #[test]
    fn test_checker_with_wildcard_allows_every_uid() {
        let ac = access_control(AuthzMode::Strict);
        let principal = principal(&[("dashboards:read", "dashboards:*")]);

        let check = ac.checker(&principal, "dashboards:read", &["dashboards:uid:"]);
        assert!(check("dashboards:uid:anything"));
        assert!(check("dashboards:uid:never-granted-literally"));
    }

    #[test]
    fn test_checker_with_literal_scopes() {
        let ac = access_control(AuthzMode::Strict);
        let principal = principal(&[
            ("dashboards:read", "dashboards:uid:1"),
            ("dashboards:read", "dashboards:uid:2"),
            ("dashboards:read", "folders:uid:f/*"),
        ]);

        let check = ac.checker(&principal, "dashboards:read", &["dashboards:uid:"]);
        assert!(check("dashboards:uid:1"));
        assert!(check("dashboards:uid:2"));
        assert!(!check("dashboards:uid:3"));
        // grants outside the prefix still match
        assert!(check("folders:uid:f/x"));

        let none = ac.checker(&principal, "dashboards:write", &["dashboards:uid:"]);
        assert!(!none("dashboards:uid:1"));
    }

    #[test]
    fn test_metadata_linear_and_trie_agree() {
        let grants = [
            ("action1", "resources:id:1"),
            ("action2", "resources:id:2"),
            ("action4", "resources:id:*"),
            ("action5", "resources:*"),
            ("action6", "*"),
            ("action7", "other:id:1"),
        ];
        let principal = principal(&grants);

        let linear = access_control(AuthzMode::Strict);
        let indexed = AccessControl::new(
            RegistryBuilder::new().freeze(),
            &Config {
                trie_threshold: 0,
                ..Config::default()
            },
        );

        let linear_fn = linear.metadata(&principal, &["resources:id:"]);
        let trie_fn = indexed.metadata(&principal, &["resources:id:"]);
        for id in ["1", "2", "3"] {
            assert_eq!(linear_fn(id), trie_fn(id), "resource {id}");
        }

        let first = linear_fn("1");
        assert!(first.contains_key("action1"));
        assert!(first.contains_key("action4"));
        assert!(first.contains_key("action6"));
        assert!(!first.contains_key("action2"));
        assert!(!first.contains_key("action7"));
    }

    #[test]
    fn test_resources_metadata_omits_unreachable_ids() {
        let ac = access_control(AuthzMode::Strict);
        let principal = principal(&[
            ("dashboards:read", "dashboards:uid:a"),
            ("dashboards:write", "dashboards:uid:a"),
            ("dashboards:read", "dashboards:uid:b"),
        ]);

        let result = ac.resources_metadata(&principal, "dashboards:uid:", ["a", "b", "c"]);
        assert_eq!(result.len(), 2);
        assert_eq!(result["a"].len(), 2);
        assert_eq!(result["b"].len(), 1);
        assert!(!result.contains_key("c"));
    }
}
