//! Network Server
//!
//! TCP server answering framed requests with a `RequestHandler`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::{is_disconnect, read_frame, write_frame, RequestHandler};
use crate::error::{Error, Result};
use crate::shutdown::{self, Shutdown};

/// Per-connection limits
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Concurrent connections served (0 = unlimited)
    pub max_connections: usize,
    /// Largest accepted request body
    pub max_message_size: usize,
    /// Close connections with no request for this long
    pub idle_timeout: Option<Duration>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            max_connections: 0,
            max_message_size: 4 * 1024,
            idle_timeout: None,
        }
    }
}

/// Network server for client and replication traffic
pub struct NetworkServer {
    listener: TcpListener,
    options: ServerOptions,
}

impl NetworkServer {
    /// Bind the listening socket
    pub async fn bind(address: &str, options: ServerOptions) -> Result<Self> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| Error::Network(format!("failed to listen on {}: {}", address, e)))?;

        Ok(Self { listener, options })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until shutdown
    pub async fn run(self, handler: Arc<dyn RequestHandler>, mut shutdown: Shutdown) -> Result<()> {
        let address = self.local_addr()?;
        tracing::info!(
            address = %address,
            max_connections = self.options.max_connections,
            max_message_size = self.options.max_message_size,
            idle_timeout = ?self.options.idle_timeout,
            "Network server listening"
        );

        let limiter = match self.options.max_connections {
            0 => None,
            n => Some(Arc::new(Semaphore::new(n))),
        };

        loop {
            let permit = match &limiter {
                Some(semaphore) => tokio::select! {
                    _ = shutdown::signalled(&mut shutdown) => break,
                    permit = Arc::clone(semaphore).acquire_owned() => match permit {
                        Ok(permit) => Some(permit),
                        Err(_) => break,
                    },
                },
                None => None,
            };

            let accepted = tokio::select! {
                _ = shutdown::signalled(&mut shutdown) => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((socket, peer)) => {
                    tracing::debug!("Accepted connection from {}", peer);
                    let connection = Connection {
                        socket,
                        peer,
                        options: self.options.clone(),
                        handler: Arc::clone(&handler),
                        _permit: permit,
                    };
                    tokio::spawn(connection.serve(shutdown.clone()));
                }
                Err(e) => {
                    tracing::error!("Accept error: {}", e);
                }
            }
        }

        // Connection tasks observe the same shutdown signal
        tracing::info!("Network server on {} stopped", address);
        Ok(())
    }
}

/// A single accepted connection
struct Connection {
    socket: TcpStream,
    peer: SocketAddr,
    options: ServerOptions,
    handler: Arc<dyn RequestHandler>,
    /// Released when the connection closes
    _permit: Option<OwnedSemaphorePermit>,
}

impl Connection {
    async fn serve(self, mut shutdown: Shutdown) {
        let Connection {
            mut socket,
            peer,
            options,
            handler,
            _permit,
        } = self;

        if let Err(e) = socket.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }
        let (mut reader, mut writer) = socket.split();
        let max_len = options.max_message_size;

        loop {
            let read = async {
                match options.idle_timeout {
                    Some(idle) => tokio::time::timeout(idle, read_frame(&mut reader, max_len))
                        .await
                        .unwrap_or_else(|_| Err(Error::ConnectionTimeout(peer.to_string()))),
                    None => read_frame(&mut reader, max_len).await,
                }
            };

            let request = tokio::select! {
                _ = shutdown::signalled(&mut shutdown) => break,
                request = read => request,
            };

            let request = match request {
                Ok(request) => request,
                Err(ref e) if is_disconnect(e) => break,
                Err(Error::ConnectionTimeout(_)) => {
                    tracing::debug!("Closing idle connection from {}", peer);
                    break;
                }
                Err(e) => {
                    tracing::warn!("Error reading request from {}: {}", peer, e);
                    break;
                }
            };

            let response = handler.handle(request).await;
            if let Err(e) = write_frame(&mut writer, &response).await {
                tracing::warn!("Error writing response to {}: {}", peer, e);
                break;
            }
        }

        tracing::debug!("Connection from {} closed", peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NetworkClient;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl RequestHandler for Echo {
        async fn handle(&self, request: Vec<u8>) -> Vec<u8> {
            let mut response = b"echo:".to_vec();
            response.extend(request);
            response
        }
    }

    async fn spawn_server(options: ServerOptions) -> (String, tokio::sync::watch::Sender<bool>) {
        let server = NetworkServer::bind("127.0.0.1:0", options).await.unwrap();
        let address = server.local_addr().unwrap().to_string();
        let (tx, rx) = shutdown::channel();
        tokio::spawn(server.run(Arc::new(Echo), rx));
        (address, tx)
    }

    #[tokio::test]
    async fn test_request_response_over_tcp() {
        let (address, _tx) = spawn_server(ServerOptions::default()).await;

        let mut client = NetworkClient::new(&address);
        assert_eq!(client.send(b"one").await.unwrap(), b"echo:one".to_vec());
        assert_eq!(client.send(b"two").await.unwrap(), b"echo:two".to_vec());
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn test_oversized_request_closes_connection() {
        let options = ServerOptions {
            max_message_size: 8,
            ..Default::default()
        };
        let (address, _tx) = spawn_server(options).await;

        let mut client = NetworkClient::new(&address);
        assert!(client.send(&[1u8; 64]).await.is_err());
        assert!(!client.is_connected());

        // A fresh connection still works
        assert_eq!(client.send(b"ok").await.unwrap(), b"echo:ok".to_vec());
    }

    #[tokio::test]
    async fn test_idle_connection_closed() {
        let options = ServerOptions {
            idle_timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let (address, _tx) = spawn_server(options).await;

        let mut client = NetworkClient::new(&address);
        client.send(b"first").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(client.send(b"second").await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting() {
        let server = NetworkServer::bind("127.0.0.1:0", ServerOptions::default())
            .await
            .unwrap();
        let (tx, rx) = shutdown::channel();
        let handle = tokio::spawn(server.run(Arc::new(Echo), rx));

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }
}
