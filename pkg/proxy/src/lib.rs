//! Per-user gateway to managed clusters.
//!
//! Every call is made with the caller's own client certificate. List calls
//! on namespaced resources are fanned out over the namespaces the caller
//! can see when they cannot see the whole cluster, and the per-namespace
//! lists are merged back into one.

pub mod error;
pub mod gateway;
pub mod merge;
pub mod page;
pub mod path;

pub use error::GatewayError;
pub use gateway::{Gateway, GatewayPolicy, ProxyContext, ProxyResponse};
