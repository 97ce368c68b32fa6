pub mod clusters;
pub mod discovery;
pub mod members;
pub mod proxy;
pub mod roles;
