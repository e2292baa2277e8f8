use std::collections::HashMap;
use std::fmt;

use crate::errors::AppResult;
use crate::models::rbac::PermissionSet;
use crate::scope;

use super::principal::Principal;
use super::resolvers::Registry;

/// Boolean expression over permissions, evaluated against a principal's permission set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluator {
    /// Granted when the action is held on a scope matching any of `scopes`.
    /// Without scopes, holding the action on any scope is enough.
    Permission { action: String, scopes: Vec<String> },
    /// Granted when every child is; an empty list is granted.
    All(Vec<Evaluator>),
    /// Granted when any child is; an empty list is denied.
    Any(Vec<Evaluator>),
}

impl Evaluator {
    pub fn permission<I, S>(action: impl Into<String>, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Evaluator::Permission {
            action: action.into(),
            scopes: scopes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn action(action: impl Into<String>) -> Self {
        Evaluator::Permission {
            action: action.into(),
            scopes: Vec::new(),
        }
    }

    pub fn all(children: impl IntoIterator<Item = Evaluator>) -> Self {
        Evaluator::All(children.into_iter().collect())
    }

    pub fn any(children: impl IntoIterator<Item = Evaluator>) -> Self {
        Evaluator::Any(children.into_iter().collect())
    }

    /// Pure evaluation; a missing action is a deny.
    pub fn evaluate(&self, permissions: &PermissionSet) -> bool {
        match self {
            Evaluator::Permission { action, scopes } => {
                let Some(granted) = permissions.scopes(action) else {
                    return false;
                };
                if scopes.is_empty() {
                    return true;
                }
                granted
                    .iter()
                    .any(|g| scopes.iter().any(|target| scope::matches(g, target)))
            }
            Evaluator::All(children) => children.iter().all(|c| c.evaluate(permissions)),
            Evaluator::Any(children) => children.iter().any(|c| c.evaluate(permissions)),
        }
    }

    /// Rewrites leaf scopes through the registry.
    ///
    /// Returns `None` when no leaf scope had a resolver, which callers treat as a deny.
    /// Each distinct scope is resolved once.
    pub async fn resolve(
        &self,
        registry: &Registry,
        principal: &Principal,
    ) -> AppResult<Option<Evaluator>> {
        let mut resolved: HashMap<&str, Vec<String>> = HashMap::new();
        let mut unresolved: Vec<&str> = Vec::new();

        for target in self.leaf_scopes() {
            if resolved.contains_key(target) || unresolved.contains(&target) {
                continue;
            }
            match registry.resolve(principal, target).await? {
                Some(scopes) => {
                    resolved.insert(target, scopes);
                }
                None => unresolved.push(target),
            }
        }

        if resolved.is_empty() {
            return Ok(None);
        }
        Ok(self.rewrite(&resolved))
    }

    fn leaf_scopes(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_scopes(&mut out);
        out
    }

    fn collect_scopes<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Evaluator::Permission { scopes, .. } => out.extend(scopes.iter().map(String::as_str)),
            Evaluator::All(children) | Evaluator::Any(children) => {
                for child in children {
                    child.collect_scopes(out);
                }
            }
        }
    }

    fn rewrite(&self, resolved: &HashMap<&str, Vec<String>>) -> Option<Evaluator> {
        match self {
            Evaluator::Permission { action, scopes } => {
                if scopes.is_empty() {
                    return Some(self.clone());
                }
                let mut changed = false;
                let mut out = Vec::with_capacity(scopes.len());
                for target in scopes {
                    match resolved.get(target.as_str()) {
                        Some(rewritten) => {
                            changed = true;
                            out.extend(rewritten.iter().cloned());
                        }
                        None => out.push(target.clone()),
                    }
                }
                changed.then(|| Evaluator::Permission {
                    action: action.clone(),
                    scopes: out,
                })
            }
            Evaluator::All(children) => {
                Self::rewrite_children(children, resolved).map(Evaluator::All)
            }
            Evaluator::Any(children) => {
                Self::rewrite_children(children, resolved).map(Evaluator::Any)
            }
        }
    }

    fn rewrite_children(
        children: &[Evaluator],
        resolved: &HashMap<&str, Vec<String>>,
    ) -> Option<Vec<Evaluator>> {
        let mut changed = false;
        let out = children
            .iter()
            .map(|child| match child.rewrite(resolved) {
                Some(rewritten) => {
                    changed = true;
                    rewritten
                }
                None => child.clone(),
            })
            .collect();
        changed.then_some(out)
    }
}

impl fmt::Display for Evaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Evaluator::Permission { action, scopes } => {
                write!(f, "{action}({})", scopes.join(" "))
            }
            Evaluator::All(children) | Evaluator::Any(children) => {
                let name = if matches!(self, Evaluator::All(_)) { "all" } else { "any" };
                write!(f, "{name}(")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{child}")?;
                }
                write!(f, ")")
            }
        }
    }
}
