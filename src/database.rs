//! Database request handler
//!
//! Parses a request line, dispatches it to storage and renders the
//! result string sent back to the client.

use async_trait::async_trait;
use std::sync::Arc;

use crate::compute::{self, CommandId};
use crate::error::{Error, Result};
use crate::network::RequestHandler;
use crate::storage::Storage;

/// Response to a successful mutation
pub const RESULT_OK: &str = "OK";

/// Query front end over storage
pub struct Database {
    storage: Arc<Storage>,
    /// Slaves only serve reads
    read_only: bool,
}

impl Database {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            read_only: false,
        }
    }

    /// Reject mutations, as on a replication slave
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Execute one request line
    pub async fn handle(&self, request: &str) -> Result<String> {
        let query = compute::parse(request)?;

        match query.command {
            CommandId::Get => match self.storage.get(query.key()) {
                Some(value) => {
                    tracing::debug!(key = query.key(), "Value for key was found");
                    Ok(value)
                }
                None => Err(Error::NotFound),
            },
            CommandId::Set => {
                self.ensure_writable()?;
                self.storage.set(query.key(), query.value()).await?;
                tracing::debug!(key = query.key(), "Key with value was saved");
                Ok(RESULT_OK.to_string())
            }
            CommandId::Del => {
                self.ensure_writable()?;
                self.storage.del(query.key()).await?;
                tracing::debug!(key = query.key(), "Key was deleted");
                Ok(RESULT_OK.to_string())
            }
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        Ok(())
    }
}

#[async_trait]
impl RequestHandler for Database {
    async fn handle(&self, request: Vec<u8>) -> Vec<u8> {
        let request = String::from_utf8_lossy(&request);

        let response = match Database::handle(self, &request).await {
            Ok(result) => result,
            Err(e) => {
                if e.is_client_error() {
                    tracing::debug!("Rejected query {:?}: {}", request, e);
                } else {
                    tracing::error!("Unable to handle query {:?}: {}", request, e);
                }
                e.to_string()
            }
        };

        response.into_bytes()
    }
}
