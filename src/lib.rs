//! swarmdex core: content fingerprinting, cross-host canonical paths, a
//! batched embedded store, and gossip-replicated metadata records.
//!
//! Every node scans its own filesystems and replicates the resulting
//! records to every other peer, so each node eventually holds the
//! complete union index.

pub mod canonical;
pub mod config;
pub mod fingerprint;
pub mod host;
pub mod identity;
pub mod processor;
pub mod record;
pub mod server;
pub mod store;
pub mod swarm;
pub mod walker;
