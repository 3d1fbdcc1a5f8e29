//! Adapters implementing the domain ports.

pub mod channel_hook;
pub mod in_memory;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
