pub mod client;
pub mod repo;
pub mod txn;
