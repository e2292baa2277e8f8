//! Scope trie: an index over a permission set keyed by scope segments.
//!
//! Scopes are split after every `:` and `/`, so `path:folder/sub` walks
//! `path:` → `folder/` → `sub`. A wildcard grant is stored on the node of its
//! literal prefix and covers every scope that passes through that node.
//! Per-row evaluation of N resources against P grants is O(N × P); looking
//! each resource up in the trie is proportional to the scope's depth instead.

use std::collections::{HashMap, HashSet};

use crate::models::rbac::{Permission, PermissionSet};
use crate::scope;

/// Actions the principal may perform on one resource.
pub type Metadata = HashMap<String, bool>;

#[derive(Debug, Default)]
struct Node {
    /// The scope text from the root down to this node.
    path: String,
    children: HashMap<String, Node>,
    /// Actions granted on exactly this scope.
    actions: HashSet<String>,
    /// Actions granted on every scope under this node.
    wildcard_actions: HashSet<String>,
}

impl Node {
    fn child_mut(&mut self, segment: &str) -> &mut Node {
        let path = &self.path;
        self.children
            .entry(segment.to_string())
            .or_insert_with(|| Node {
                path: format!("{path}{segment}"),
                ..Node::default()
            })
    }

    fn collect(&self, action: &str, out: &mut Vec<String>) {
        if self.actions.contains(action) {
            out.push(self.path.clone());
        }
        if self.wildcard_actions.contains(action) {
            out.push(format!("{}{}", self.path, scope::ALL));
        }
        for child in self.children.values() {
            child.collect(action, out);
        }
    }
}

fn segments(scope: &str) -> impl Iterator<Item = &str> {
    scope.split_inclusive(|c: char| c == ':' || c == '/')
}

#[derive(Debug, Default)]
pub struct ScopeTrie {
    root: Node,
    len: usize,
}

impl ScopeTrie {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_permission_set(permissions: &PermissionSet) -> Self {
        let mut trie = Self::new();
        for (action, scopes) in permissions.iter() {
            for s in scopes {
                trie.insert(action, s);
            }
        }
        trie
    }

    pub fn from_permissions(permissions: &[Permission]) -> Self {
        let mut trie = Self::new();
        for p in permissions {
            trie.insert(&p.action, &p.scope);
        }
        trie
    }

    pub fn insert(&mut self, action: &str, granted: &str) {
        let (target, wildcard) = match scope::wildcard_prefix(granted) {
            Some(prefix) => (prefix, true),
            None => (granted, false),
        };

        let mut node = &mut self.root;
        for segment in segments(target) {
            node = node.child_mut(segment);
        }

        let added = if wildcard {
            node.wildcard_actions.insert(action.to_string())
        } else {
            node.actions.insert(action.to_string())
        };
        if added {
            self.len += 1;
        }
    }

    /// Number of distinct (action, scope) grants indexed.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn has_access(&self, action: &str, target: &str) -> bool {
        let mut node = &self.root;
        if node.wildcard_actions.contains(action) {
            return true;
        }
        for segment in segments(target) {
            match node.children.get(segment) {
                Some(next) => node = next,
                None => return false,
            }
            if node.wildcard_actions.contains(action) {
                return true;
            }
        }
        node.actions.contains(action)
    }

    /// Every action granted on `target` through the global wildcard, a
    /// wildcard over one of its prefixes, or the literal scope.
    pub fn metadata(&self, target: &str) -> Metadata {
        let mut out = Metadata::new();
        let mut node = &self.root;
        let mut complete = true;

        Self::grant_all(&mut out, &node.wildcard_actions);
        for segment in segments(target) {
            match node.children.get(segment) {
                Some(next) => node = next,
                None => {
                    complete = false;
                    break;
                }
            }
            Self::grant_all(&mut out, &node.wildcard_actions);
        }
        if complete {
            Self::grant_all(&mut out, &node.actions);
        }
        out
    }

    /// Scopes under `prefix` granting `action`.
    ///
    /// The flag is true when a wildcard covers the whole prefix; the list is
    /// then empty and must not be read as exhaustive. `prefix` should end at a
    /// separator, e.g. `dashboards:uid:`.
    pub fn scopes(&self, action: &str, prefix: &str) -> (Vec<String>, bool) {
        let mut node = &self.root;
        if node.wildcard_actions.contains(action) {
            return (Vec::new(), true);
        }
        for segment in segments(prefix) {
            match node.children.get(segment) {
                Some(next) => node = next,
                None => return (Vec::new(), false),
            }
            if node.wildcard_actions.contains(action) {
                return (Vec::new(), true);
            }
        }

        let mut out = Vec::new();
        node.collect(action, &mut out);
        out.sort();
        (out, false)
    }

    fn grant_all(out: &mut Metadata, actions: &HashSet<String>) {
        for action in actions {
            out.insert(action.clone(), true);
        }
    }
}
