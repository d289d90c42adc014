//! Replication master
//!
//! Serves WAL segments to slaves. The master keeps no per-slave state:
//! every request names the slave's newest segment and the answer is found
//! by listing the data directory.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use super::protocol::{MasterResponse, SlaveRequest};
use super::ReplicationNode;
use crate::config::ReplicaRole;
use crate::error::{Error, Result};
use crate::network::{NetworkServer, RequestHandler, ServerOptions};
use crate::shutdown::Shutdown;
use crate::wal::segment;

/// Largest slave request accepted; requests only carry a segment name
const MAX_REQUEST_SIZE: usize = 64 * 1024;

/// Replication master node
#[derive(Debug, Clone)]
pub struct Master {
    address: String,
    data_directory: PathBuf,
}

impl Master {
    pub fn new(address: impl Into<String>, data_directory: impl Into<PathBuf>) -> Self {
        Self {
            address: address.into(),
            data_directory: data_directory.into(),
        }
    }

    /// Answer one slave request; local failures become a failed response
    pub fn respond(&self, request: &SlaveRequest) -> MasterResponse {
        match self.lookup(request) {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(
                    last_segment = %request.last_segment_name,
                    "Failed to find WAL segment for slave: {}",
                    e
                );
                MasterResponse::failed()
            }
        }
    }

    fn lookup(&self, request: &SlaveRequest) -> Result<MasterResponse> {
        let dir = &self.data_directory;
        let last = request.last_segment_name.as_str();

        // The slave's newest segment may still be growing here
        if !last.is_empty() {
            match segment::segment_len(dir, last) {
                Ok(len) if len > request.last_segment_size => {
                    tracing::debug!(
                        "Resending grown segment {} ({} > {} bytes)",
                        last,
                        len,
                        request.last_segment_size
                    );
                    let data = segment::read_segment(dir, last)?;
                    return Ok(MasterResponse::segment(last, data));
                }
                Ok(_) => {}
                Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }

        match segment::next_segment_after(dir, last)? {
            Some(name) => {
                let data = segment::read_segment(dir, &name)?;
                tracing::debug!("Sending segment {} ({} bytes)", name, data.len());
                Ok(MasterResponse::segment(name, data))
            }
            None => Ok(MasterResponse::nothing_newer()),
        }
    }

    /// Serve slave requests on an already bound server
    pub async fn serve(&self, server: NetworkServer, shutdown: Shutdown) -> Result<()> {
        tracing::info!(
            "Replication master serving segments from {:?}",
            self.data_directory
        );
        server.run(Arc::new(self.clone()), shutdown).await
    }
}

#[async_trait]
impl RequestHandler for Master {
    async fn handle(&self, request: Vec<u8>) -> Vec<u8> {
        let response = match SlaveRequest::deserialize(&request) {
            Ok(request) => self.respond(&request),
            Err(e) => {
                tracing::error!("Unable to decode replication request: {}", e);
                MasterResponse::failed()
            }
        };

        match response.serialize() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("Unable to encode replication response: {}", e);
                MasterResponse::failed().serialize().unwrap_or_default()
            }
        }
    }
}

#[async_trait]
impl ReplicationNode for Master {
    fn role(&self) -> ReplicaRole {
        ReplicaRole::Master
    }

    async fn start(&self, shutdown: Shutdown) -> Result<()> {
        let options = ServerOptions {
            max_message_size: MAX_REQUEST_SIZE,
            ..ServerOptions::default()
        };
        let server = NetworkServer::bind(&self.address, options).await?;
        self.serve(server, shutdown).await
    }
}
