//! Write-Ahead Log Module
//!
//! Append-only, segmented log of mutations. Every write is durable before
//! it is acknowledged, the log is replayed on startup, and the same
//! segment files are what a master ships to its slaves.

pub mod record;
pub mod segment;
pub(crate) mod log_manager;
mod writer;

pub use log_manager::LogManager;
pub use record::{Command, Completion, Record};
pub use segment::{SegmentStorage, SegmentStore};
pub use writer::Wal;

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Resolved WAL settings
#[derive(Debug, Clone)]
pub struct WalSettings {
    /// Size after which the active segment is sealed
    pub max_segment_size: u64,
    /// Records per batch that trigger an immediate flush
    pub flushing_batch_size: usize,
    /// Longest a buffered record waits for a flush
    pub flushing_batch_timeout: Duration,
    /// Directory holding the segment files
    pub data_directory: PathBuf,
}

impl WalSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_segment_size == 0 {
            return Err(Error::Config("wal.max_segment_size must be positive".into()));
        }
        if self.flushing_batch_size == 0 {
            return Err(Error::Config(
                "wal.flushing_batch_size must be at least 1".into(),
            ));
        }
        if self.flushing_batch_timeout.is_zero() {
            return Err(Error::Config(
                "wal.flushing_batch_timeout must be positive".into(),
            ));
        }
        if self.data_directory.as_os_str().is_empty() {
            return Err(Error::Config("wal.data_directory must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> WalSettings {
        WalSettings {
            max_segment_size: 10 * 1024 * 1024,
            flushing_batch_size: 100,
            flushing_batch_timeout: Duration::from_millis(10),
            data_directory: PathBuf::from("/tmp/wal"),
        }
    }

    #[test]
    fn test_validate() {
        assert!(valid().validate().is_ok());

        let mut s = valid();
        s.flushing_batch_size = 0;
        assert!(s.validate().is_err());

        let mut s = valid();
        s.flushing_batch_timeout = Duration::ZERO;
        assert!(s.validate().is_err());

        let mut s = valid();
        s.max_segment_size = 0;
        assert!(s.validate().is_err());
    }
}
