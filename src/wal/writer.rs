//! WAL Writer
//!
//! Batched writer for the Write-Ahead Log. Records are appended to a
//! pending buffer; a background task flushes the buffer when it reaches
//! the batch size or when the batch timeout fires, whichever comes first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::log_manager::LogManager;
use super::record::{Completion, Record, WriteRequest};
use super::segment::{SegmentStorage, SegmentStore};
use super::WalSettings;
use crate::error::{Error, Result};
use crate::shutdown::{self, Shutdown};

type Batch = Vec<WriteRequest>;

/// Write-Ahead Log handle
pub struct Wal {
    settings: WalSettings,
    /// Records waiting for the next flush
    pending: Arc<Mutex<Batch>>,
    /// Single-slot handoff of full batches to the flush task
    batch_tx: mpsc::Sender<Batch>,
    /// Taken by `start`
    batch_rx: std::sync::Mutex<Option<mpsc::Receiver<Batch>>>,
    log: Arc<std::sync::Mutex<LogManager>>,
    /// Set once the flush task has drained for shutdown
    closed: Arc<AtomicBool>,
}

/// State moved into the flush task
struct Flusher {
    pending: Arc<Mutex<Batch>>,
    batches: mpsc::Receiver<Batch>,
    log: Arc<std::sync::Mutex<LogManager>>,
    closed: Arc<AtomicBool>,
    timeout: Duration,
}

impl Wal {
    /// Create a WAL writing segments into `settings.data_directory`
    pub fn new(settings: WalSettings) -> Result<Self> {
        settings.validate()?;
        let store = SegmentStore::new(
            settings.data_directory.clone(),
            settings.max_segment_size,
        )?;
        Self::with_store(settings, Box::new(store))
    }

    /// Create a WAL over a caller-supplied segment store
    pub fn with_store(settings: WalSettings, store: Box<dyn SegmentStorage>) -> Result<Self> {
        settings.validate()?;
        let (batch_tx, batch_rx) = mpsc::channel(1);

        Ok(Self {
            settings,
            pending: Arc::new(Mutex::new(Vec::new())),
            batch_tx,
            batch_rx: std::sync::Mutex::new(Some(batch_rx)),
            log: Arc::new(std::sync::Mutex::new(LogManager::new(store))),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// WAL settings
    pub fn settings(&self) -> &WalSettings {
        &self.settings
    }

    /// Launch the background flush task
    pub fn start(&self, shutdown: Shutdown) -> Result<JoinHandle<()>> {
        let batches = self
            .batch_rx
            .lock()
            .map_err(|_| Error::Wal("WAL state poisoned".into()))?
            .take()
            .ok_or_else(|| Error::Wal("WAL flush task already started".into()))?;

        tracing::info!(
            flushing_batch_size = self.settings.flushing_batch_size,
            flushing_batch_timeout = ?self.settings.flushing_batch_timeout,
            max_segment_size = self.settings.max_segment_size,
            "Starting WAL"
        );

        let flusher = Flusher {
            pending: Arc::clone(&self.pending),
            batches,
            log: Arc::clone(&self.log),
            closed: Arc::clone(&self.closed),
            timeout: self.settings.flushing_batch_timeout,
        };

        Ok(tokio::spawn(flusher.run(shutdown)))
    }

    /// Read every logged record, oldest first
    pub fn recover(&self) -> Result<Vec<Record>> {
        self.log
            .lock()
            .map_err(|_| Error::Wal("log manager poisoned".into()))?
            .read_all()
    }

    /// Log a SET and wait until it is durable
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.push(Record::set(key, value)).await?.wait().await
    }

    /// Log a DELETE and wait until it is durable
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.push(Record::delete(key)).await?.wait().await
    }

    /// Buffer a record and hand back its durability completion
    ///
    /// When the buffer reaches the batch size the whole buffer is handed to
    /// the flush task before the lock is released, so batches reach the
    /// log in the order they were formed.
    pub async fn push(&self, record: Record) -> Result<Completion> {
        let (request, completion) = WriteRequest::new(record);

        let mut pending = self.pending.lock().await;
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ShuttingDown);
        }

        pending.push(request);
        if pending.len() >= self.settings.flushing_batch_size {
            let batch = std::mem::take(&mut *pending);
            self.batch_tx
                .send(batch)
                .await
                .map_err(|_| Error::ShuttingDown)?;
        }

        Ok(completion)
    }
}

impl Flusher {
    async fn run(mut self, mut shutdown: Shutdown) {
        let mut ticker = interval_at(Instant::now() + self.timeout, self.timeout);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown::signalled(&mut shutdown) => break,
                Some(batch) = self.batches.recv() => {
                    tracing::trace!("Flushing full WAL batch of {}", batch.len());
                    self.flush(batch);
                    ticker.reset();
                }
                _ = ticker.tick() => {
                    let batch = {
                        let mut pending = self.lock_pending().await;
                        std::mem::take(&mut *pending)
                    };
                    if !batch.is_empty() {
                        tracing::trace!("Flushing WAL batch of {} on timeout", batch.len());
                        self.flush(batch);
                    }
                }
            }
        }

        self.drain().await;
        tracing::debug!("WAL flush task stopped");
    }

    /// Final flush: nothing is accepted once the buffer has been taken
    async fn drain(&mut self) {
        let remainder = {
            let mut pending = self.lock_pending().await;
            self.closed.store(true, Ordering::Release);
            std::mem::take(&mut *pending)
        };

        // Batches handed off before we took the lock precede the remainder
        while let Ok(batch) = self.batches.try_recv() {
            self.flush(batch);
        }
        if !remainder.is_empty() {
            self.flush(remainder);
        }
        self.batches.close();
    }

    /// Acquire the pending buffer while servicing handoffs
    ///
    /// A producer that filled the buffer holds the lock until its batch is
    /// accepted by the handoff slot, so the slot has to keep draining here.
    async fn lock_pending(&mut self) -> OwnedMutexGuard<Batch> {
        loop {
            let pending = Arc::clone(&self.pending);
            tokio::select! {
                biased;
                Some(batch) = self.batches.recv() => self.flush(batch),
                guard = pending.lock_owned() => return guard,
            }
        }
    }

    fn flush(&self, batch: Batch) {
        match self.log.lock() {
            Ok(mut log) => log.write(batch),
            Err(_) => {
                tracing::error!("WAL log manager poisoned, failing {} records", batch.len());
                for request in batch {
                    request.complete(Err(Error::Wal("log manager poisoned".into())));
                }
            }
        }
    }
}
