//! Shared data model for fleetgate: clusters, bindings, members, pages,
//! RBAC shapes, API discovery and configuration files.

pub mod cluster;
pub mod config;
pub mod discovery;
pub mod member;
pub mod page;
pub mod rbac;
pub mod user;
pub mod validate;
