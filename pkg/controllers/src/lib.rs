//! Cluster onboarding, credential issuance and membership.

mod access;
pub mod discovery;
pub mod error;
pub mod issuer;
pub mod lifecycle;
pub mod members;
pub mod preflight;
pub mod roles;

pub use error::ClusterError;
pub use lifecycle::{ClusterLifecycle, Deleted, LifecycleConfig, Registered};
