//! Adapters behind the domain ports: in-memory stores, the tenant policy
//! cache and, with the `storage-rocksdb` feature, a persistent backend for
//! daily aggregates and orchestration history.

pub mod in_memory;
pub mod policy_cache;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
