pub mod authz;
pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod scope;
pub mod service;
pub mod store;

// Re-export commonly used items for tests
pub use authz::{AccessControl, Evaluator, Principal, RegistryBuilder};
pub use config::Config;
pub use errors::{AppError, AppResult};
pub use service::PermissionService;
pub use store::ResourcePermissionStore;
