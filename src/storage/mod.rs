//! Storage Module
//!
//! Combines the in-memory engine with the optional WAL. Mutations are
//! logged before they are applied; the log is replayed on construction.
//! On a slave, records shipped by the master arrive through the
//! replication stream and are applied without being logged again.

pub mod engine;

pub use engine::Engine;

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::shutdown::{self, Shutdown};
use crate::wal::{Command, Record, Wal};

/// Segments that may be queued between the slave and the engine
pub const REPLICATION_STREAM_CAPACITY: usize = 16;

/// Sending side of the replication stream, one entry per applied segment
pub type ReplicationStream = mpsc::Sender<Vec<Record>>;

/// Engine + WAL facade
pub struct Storage {
    engine: Arc<Engine>,
    wal: Option<Arc<Wal>>,
    stream_tx: ReplicationStream,
    stream_rx: Mutex<Option<mpsc::Receiver<Vec<Record>>>>,
}

impl Storage {
    /// Create storage, replaying the WAL into the engine when one is given
    pub fn new(engine: Arc<Engine>, wal: Option<Arc<Wal>>) -> Result<Self> {
        let (stream_tx, stream_rx) = mpsc::channel(REPLICATION_STREAM_CAPACITY);
        let storage = Self {
            engine,
            wal,
            stream_tx,
            stream_rx: Mutex::new(Some(stream_rx)),
        };

        if let Some(wal) = &storage.wal {
            let records = wal.recover()?;
            storage.restore(&records)?;
            tracing::info!(
                "Recovered {} WAL records, {} keys in engine",
                records.len(),
                storage.engine.len()
            );
        }

        Ok(storage)
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn has_wal(&self) -> bool {
        self.wal.is_some()
    }

    /// Read a key from the engine
    pub fn get(&self, key: &str) -> Option<String> {
        self.engine.get(key)
    }

    /// Log then apply a SET
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        if let Some(wal) = &self.wal {
            wal.set(key, value).await?;
        }
        self.engine.set(key, value);
        Ok(())
    }

    /// Log then apply a DELETE
    pub async fn del(&self, key: &str) -> Result<()> {
        if let Some(wal) = &self.wal {
            wal.delete(key).await?;
        }
        self.engine.delete(key);
        Ok(())
    }

    /// Apply a logged or replicated record to the engine
    pub fn apply(&self, record: &Record) -> Result<()> {
        match (record.command, record.args.as_slice()) {
            (Command::Set, [key, value]) => self.engine.set(key.as_str(), value.as_str()),
            (Command::Delete, [key]) => self.engine.delete(key),
            _ => {
                return Err(Error::Wal(format!(
                    "malformed {} record with {} arguments",
                    record.command,
                    record.args.len()
                )))
            }
        }
        Ok(())
    }

    fn restore(&self, records: &[Record]) -> Result<()> {
        records.iter().try_for_each(|record| self.apply(record))
    }

    /// Sender handed to the replication slave
    pub fn replication_stream(&self) -> ReplicationStream {
        self.stream_tx.clone()
    }

    /// Spawn the task applying replicated records in arrival order
    pub fn start_replication_apply(self: &Arc<Self>, mut shutdown: Shutdown) -> Result<JoinHandle<()>> {
        let mut stream = self
            .stream_rx
            .lock()
            .map_err(|_| Error::Replication("replication stream poisoned".into()))?
            .take()
            .ok_or_else(|| Error::Replication("replication apply already started".into()))?;

        let storage = Arc::clone(self);
        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown::signalled(&mut shutdown) => break,
                    batch = stream.recv() => match batch {
                        Some(records) => storage.apply_replicated(&records),
                        None => break,
                    },
                }
            }

            // Segments already accepted by the stream were saved by the slave
            stream.close();
            while let Ok(records) = stream.try_recv() {
                storage.apply_replicated(&records);
            }
            tracing::debug!("Replication apply task stopped");
        }))
    }

    fn apply_replicated(&self, records: &[Record]) {
        match self.restore(records) {
            Ok(()) => tracing::debug!("Applied {} replicated records", records.len()),
            Err(e) => tracing::error!(
                "Stopped applying a replicated batch of {} records: {}",
                records.len(),
                e
            ),
        }
    }
}
