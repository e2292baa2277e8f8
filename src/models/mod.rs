pub mod rbac;
pub mod resource_permission;
