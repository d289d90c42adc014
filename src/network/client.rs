//! Network Client
//!
//! Synchronous request/response client over a single persistent TCP
//! connection. The connection is opened lazily and dropped on any error,
//! so the next request reconnects.

use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::{read_frame, write_frame};
use crate::error::{Error, Result};

/// Default connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Default response size limit (segments travel in one response)
pub const DEFAULT_MAX_RESPONSE_SIZE: usize = 512 * 1024 * 1024;

/// Network client for a single peer
pub struct NetworkClient {
    address: String,
    connect_timeout: Duration,
    request_timeout: Duration,
    max_response_size: usize,
    stream: Option<TcpStream>,
}

impl NetworkClient {
    /// Create a client for `address`; nothing is connected yet
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_response_size: DEFAULT_MAX_RESPONSE_SIZE,
            stream: None,
        }
    }

    /// Override connect and request timeouts
    pub fn with_timeouts(mut self, connect_timeout: Duration, request_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self.request_timeout = request_timeout;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Send a request and wait for its response
    pub async fn send(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        let result = match timeout(self.request_timeout, self.send_inner(request)).await {
            Ok(result) => result,
            Err(_) => Err(Error::ConnectionTimeout(self.address.clone())),
        };

        if result.is_err() {
            // The stream may hold half a frame
            self.stream = None;
        }
        result
    }

    async fn send_inner(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        if self.stream.is_none() {
            self.stream = Some(self.connect().await?);
        }
        let max_len = self.max_response_size;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| Error::Network("not connected".into()))?;

        write_frame(stream, request).await?;
        read_frame(stream, max_len).await
    }

    /// Drop the connection
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("Closed connection to {}", self.address);
        }
    }

    async fn connect(&self) -> Result<TcpStream> {
        match timeout(self.connect_timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                tracing::debug!("Connected to {}", self.address);
                Ok(stream)
            }
            Ok(Err(e)) => Err(Error::ConnectionFailed {
                address: self.address.clone(),
                reason: e.to_string(),
            }),
            Err(_) => Err(Error::ConnectionTimeout(self.address.clone())),
        }
    }
}
