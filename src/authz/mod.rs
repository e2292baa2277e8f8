//! Authorization module - evaluation engine
//!
//! This module implements permission evaluation with support for:
//! - (action, scope) grants with flat and path wildcards
//! - All/Any combinators over permissions
//! - Keyword and attribute scope resolvers, tried only after a plain evaluation fails
//! - Bulk checks for list endpoints (`checker`, `metadata`) backed by a scope trie
//! - Configurable enforcement modes (off/advisory/strict)

mod access_control;
mod evaluator;
mod principal;
pub mod resolvers;
mod trie;

pub use access_control::{AccessControl, MetadataFn, ScopeChecker};
pub use evaluator::Evaluator;
pub use principal::{Principal, PrincipalKind};
pub use resolvers::{Registry, RegistryBuilder, ScopeAttributeResolver, ScopeKeywordResolver};
pub use trie::{Metadata, ScopeTrie};

use std::str::FromStr;

use crate::errors::AppError;

/// Authorization enforcement mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthzMode {
    /// No permission checks (development mode)
    Off,
    /// Log denials but allow requests (testing mode)
    Advisory,
    /// Return 403 on denied requests (production mode)
    Strict,
}

impl FromStr for AuthzMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "off" => Ok(AuthzMode::Off),
            "advisory" => Ok(AuthzMode::Advisory),
            "strict" => Ok(AuthzMode::Strict),
            other => Err(AppError::configuration(format!(
                "AUTHZ_MODE must be off, advisory or strict, got {other}"
            ))),
        }
    }
}
