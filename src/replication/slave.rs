//! Replication slave
//!
//! Polls the master for the segment after its newest local one, saves it
//! under the same name and publishes the decoded records to storage.
//! The newest saved segment is the resume point, so a failed tick is
//! simply retried on the next one.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::protocol::{MasterResponse, SlaveRequest};
use super::ReplicationNode;
use crate::config::ReplicaRole;
use crate::error::{Error, Result};
use crate::network::NetworkClient;
use crate::shutdown::{self, Shutdown};
use crate::storage::ReplicationStream;
use crate::wal::record::decode_records;
use crate::wal::segment;

/// Slave sync state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaveState {
    Idle,
    Requesting,
    Applying,
    Stopped,
}

impl std::fmt::Display for SlaveState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlaveState::Idle => write!(f, "idle"),
            SlaveState::Requesting => write!(f, "requesting"),
            SlaveState::Applying => write!(f, "applying"),
            SlaveState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Result of one sync round trip
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Master has nothing newer
    UpToDate,
    /// A segment was saved and its records published
    Applied { segment: String, records: usize },
}

/// Replication slave node
pub struct Slave {
    data_directory: PathBuf,
    sync_interval: Duration,
    client: tokio::sync::Mutex<NetworkClient>,
    stream: ReplicationStream,
    state: Mutex<SlaveState>,
}

impl Slave {
    pub fn new(
        master_address: impl Into<String>,
        data_directory: impl Into<PathBuf>,
        sync_interval: Duration,
        stream: ReplicationStream,
    ) -> Self {
        Self {
            data_directory: data_directory.into(),
            sync_interval,
            client: tokio::sync::Mutex::new(NetworkClient::new(master_address)),
            stream,
            state: Mutex::new(SlaveState::Idle),
        }
    }

    pub fn state(&self) -> SlaveState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: SlaveState) {
        let mut current = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != state {
            tracing::trace!("Slave state {} -> {}", *current, state);
            *current = state;
        }
    }

    /// Run one sync round trip with the master
    pub async fn sync_with_master(&self) -> Result<SyncOutcome> {
        self.set_state(SlaveState::Requesting);
        let outcome = self.sync_once().await;
        self.set_state(SlaveState::Idle);
        outcome
    }

    async fn sync_once(&self) -> Result<SyncOutcome> {
        let dir = self.data_directory.as_path();
        let (last_name, last_size) = match segment::last_segment(dir)? {
            Some(name) => {
                let size = segment::segment_len(dir, &name)?;
                (name, size)
            }
            None => (String::new(), 0),
        };

        let request = SlaveRequest::new(last_name.clone(), last_size).serialize()?;
        let response_bytes = self.client.lock().await.send(&request).await?;
        let response = MasterResponse::deserialize(&response_bytes)?;

        if !response.succeeded {
            return Err(Error::Replication(
                "master was unable to serve the request".into(),
            ));
        }
        if response.segment_name.is_empty() {
            return Ok(SyncOutcome::UpToDate);
        }

        // Same segment again means it grew on the master; only the tail is new
        let unseen = if response.segment_name == last_name {
            match usize::try_from(last_size)
                .ok()
                .and_then(|offset| response.segment_data.get(offset..))
            {
                Some(tail) if !tail.is_empty() => tail,
                _ => return Ok(SyncOutcome::UpToDate),
            }
        } else {
            response.segment_data.as_slice()
        };

        // Decode before saving so a bad segment never becomes the resume point
        let records = decode_records(unseen)?;

        self.set_state(SlaveState::Applying);
        segment::save_segment(dir, &response.segment_name, &response.segment_data)?;

        let count = records.len();
        if count > 0 {
            self.stream
                .send(records)
                .await
                .map_err(|_| Error::ShuttingDown)?;
        }

        Ok(SyncOutcome::Applied {
            segment: response.segment_name,
            records: count,
        })
    }

    fn log_outcome(&self, outcome: Result<SyncOutcome>) {
        match outcome {
            Ok(SyncOutcome::UpToDate) => tracing::trace!("Slave is up to date"),
            Ok(SyncOutcome::Applied { segment, records }) => {
                tracing::info!("Replicated segment {} ({} records)", segment, records)
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!("Master unreachable, retrying next tick: {}", e)
            }
            Err(e) => tracing::error!("Unable to sync with master: {}", e),
        }
    }
}

#[async_trait]
impl ReplicationNode for Slave {
    fn role(&self) -> ReplicaRole {
        ReplicaRole::Slave
    }

    async fn start(&self, mut shutdown: Shutdown) -> Result<()> {
        tracing::info!(
            sync_interval = ?self.sync_interval,
            "Replication slave started, data directory {:?}",
            self.data_directory
        );

        let mut ticker = interval_at(Instant::now() + self.sync_interval, self.sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown::signalled(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                biased;
                _ = shutdown::signalled(&mut shutdown) => break,
                outcome = self.sync_with_master() => self.log_outcome(outcome),
            }
        }

        self.client.lock().await.close();
        self.set_state(SlaveState::Stopped);
        tracing::info!("Replication slave stopped");
        Ok(())
    }
}
