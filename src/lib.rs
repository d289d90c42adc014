//! WolfKV - In-memory key-value store
//!
//! A single-node key-value store with optional crash durability through a
//! segmented Write-Ahead Log (WAL) and optional asynchronous master/slave
//! replication of WAL segments.
//!
//! # Architecture
//!
//! Client queries arrive over a framed TCP protocol, are parsed by
//! [`compute`] and executed by [`database::Database`] against
//! [`storage::Storage`]. Storage logs every mutation to the [`wal::Wal`]
//! before applying it to the in-memory [`storage::Engine`].
//!
//! A replication master serves its WAL segments to slaves; a slave polls
//! the master, saves each segment locally and applies its records.
//!
//! # Features
//!
//! - Batched WAL flushing by size or timeout, one fsync per batch
//! - Segment rotation and crash recovery by replay
//! - Resumable, segment-granular replication with tail catch-up
//! - TOML configuration with human-readable sizes and durations

pub mod compute;
pub mod config;
pub mod database;
pub mod error;
pub mod network;
pub mod replication;
pub mod shutdown;
pub mod storage;
pub mod wal;

pub use config::WolfKvConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{ReplicaRole, WolfKvConfig};
    pub use crate::database::Database;
    pub use crate::error::{Error, Result};
    pub use crate::replication::{Master, ReplicationNode, Slave};
    pub use crate::storage::{Engine, Storage};
    pub use crate::wal::{Record, Wal, WalSettings};
}
