//! Key material for managed clusters.
//!
//! Every registered cluster gets its own private key. User client
//! certificates are requested from the downstream cluster over a CSR made
//! with that key, so a certificate is only usable together with the key of
//! the cluster it was issued for.

pub mod identity;
pub mod key;
