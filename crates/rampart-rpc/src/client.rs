//! Pooled client for a remote coordination store.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rampart_constants::network::DEFAULT_STORE_POOL_SIZE;
use rampart_constants::network::MAX_STORE_POOL_SIZE;
use rampart_constants::network::MAX_STORE_TIMEOUT_MS;
use rampart_constants::DEFAULT_STORE_CONNECT_TIMEOUT_MS;
use rampart_constants::DEFAULT_STORE_OPERATION_TIMEOUT_MS;
use rampart_core::DeleteRequest;
use rampart_core::DeleteResult;
use rampart_core::KeyValueStore;
use rampart_core::KeyValueStoreError;
use rampart_core::ReadRequest;
use rampart_core::ReadResult;
use rampart_core::WriteRequest;
use rampart_core::WriteResult;
use tokio::net::TcpStream;
use tracing::debug;

use crate::protocol;
use crate::protocol::ProtocolError;
use crate::protocol::Request;
use crate::protocol::Response;

/// Connection settings for [`RemoteKeyValueStore`].
#[derive(Debug, Clone)]
pub struct RemoteStoreConfig {
    /// `host:port` of a `rampart-store` server.
    pub address: String,
    pub connect_timeout: Duration,
    /// Deadline for one request/response exchange.
    pub operation_timeout: Duration,
    /// Idle connections kept for reuse.
    pub pool_size: usize,
}

impl RemoteStoreConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            connect_timeout: Duration::from_millis(DEFAULT_STORE_CONNECT_TIMEOUT_MS),
            operation_timeout: Duration::from_millis(DEFAULT_STORE_OPERATION_TIMEOUT_MS),
            pool_size: DEFAULT_STORE_POOL_SIZE,
        }
    }
}

/// [`KeyValueStore`] backed by a `rampart-store` server.
///
/// Idle connections are pooled. The pool lock is only held to push or pop a
/// connection, never across I/O. A connection that fails mid-exchange is
/// dropped rather than returned, since its framing state is unknown. If a
/// pooled connection turns out to have been closed by the server, the pool
/// is emptied and the request is retried once on a fresh connection.
///
/// Connection and I/O failures become `Unavailable`, elapsed deadlines become
/// `Timeout`, and malformed replies become `Protocol`.
pub struct RemoteKeyValueStore {
    config: RemoteStoreConfig,
    idle: Mutex<Vec<TcpStream>>,
}

impl RemoteKeyValueStore {
    pub fn new(mut config: RemoteStoreConfig) -> Self {
        config.pool_size = config.pool_size.clamp(1, MAX_STORE_POOL_SIZE);
        let cap = Duration::from_millis(MAX_STORE_TIMEOUT_MS);
        config.connect_timeout = config.connect_timeout.min(cap);
        config.operation_timeout = config.operation_timeout.min(cap);
        Self {
            config,
            idle: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &RemoteStoreConfig {
        &self.config
    }

    /// Round-trip a ping.
    pub async fn ping(&self) -> Result<(), KeyValueStoreError> {
        match self.call(Request::Ping).await? {
            Response::Pong => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    async fn connect(&self) -> Result<TcpStream, KeyValueStoreError> {
        let connect = TcpStream::connect(&self.config.address);
        let stream = tokio::time::timeout(self.config.connect_timeout, connect)
            .await
            .map_err(|_| KeyValueStoreError::Timeout {
                duration_ms: self.config.connect_timeout.as_millis() as u64,
            })?
            .map_err(|e| KeyValueStoreError::Unavailable {
                reason: format!("connect to {}: {e}", self.config.address),
            })?;
        stream.set_nodelay(true).map_err(|e| KeyValueStoreError::Unavailable { reason: e.to_string() })?;
        debug!(address = %self.config.address, "opened store connection");
        Ok(stream)
    }

    fn checkin(&self, stream: TcpStream) {
        let mut idle = self.idle.lock();
        if idle.len() < self.config.pool_size {
            idle.push(stream);
        }
    }

    async fn exchange(stream: &mut TcpStream, request: &Request) -> Result<Response, ProtocolError> {
        let data = protocol::encode(request)?;
        protocol::write_message(stream, &data).await?;
        let reply = protocol::read_message(stream).await?;
        protocol::decode(&reply)
    }

    /// One exchange under the operation deadline. The stream goes back to
    /// the pool only if the exchange completed.
    async fn round_trip(&self, mut stream: TcpStream, request: &Request) -> Result<Response, ProtocolError> {
        match tokio::time::timeout(self.config.operation_timeout, Self::exchange(&mut stream, request)).await {
            Err(_) => Err(ProtocolError::Timeout),
            Ok(Err(e)) => Err(e),
            Ok(Ok(response)) => {
                self.checkin(stream);
                Ok(response)
            }
        }
    }

    async fn call(&self, request: Request) -> Result<Response, KeyValueStoreError> {
        let pooled = self.idle.lock().pop();
        let result = match pooled {
            Some(stream) => match self.round_trip(stream, &request).await {
                // The server closed this connection while it sat idle,
                // typically across a restart. The rest of the pool is
                // from the same era.
                Err(e) if closed_by_peer(&e) => {
                    debug!(address = %self.config.address, error = %e, "pooled store connection closed, reconnecting");
                    self.idle.lock().clear();
                    let stream = self.connect().await?;
                    self.round_trip(stream, &request).await
                }
                other => other,
            },
            None => {
                let stream = self.connect().await?;
                self.round_trip(stream, &request).await
            }
        };

        match result.map_err(|e| self.map_protocol_error(e))? {
            Response::Error { error } => Err(error),
            other => Ok(other),
        }
    }

    fn map_protocol_error(&self, e: ProtocolError) -> KeyValueStoreError {
        match e {
            ProtocolError::Io(e) => KeyValueStoreError::Unavailable { reason: e.to_string() },
            ProtocolError::ConnectionClosed => KeyValueStoreError::Unavailable {
                reason: "connection closed by store".into(),
            },
            ProtocolError::Timeout => KeyValueStoreError::Timeout {
                duration_ms: self.config.operation_timeout.as_millis() as u64,
            },
            other => KeyValueStoreError::Protocol { reason: other.to_string() },
        }
    }
}

/// EOF before a reply frame, or the peer resetting the connection.
fn closed_by_peer(e: &ProtocolError) -> bool {
    match e {
        ProtocolError::ConnectionClosed => true,
        ProtocolError::Io(e) => matches!(
            e.kind(),
            std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionAborted
        ),
        _ => false,
    }
}

fn unexpected(response: &Response) -> KeyValueStoreError {
    KeyValueStoreError::Protocol {
        reason: ProtocolError::UnexpectedResponse(format!("{response:?}")).to_string(),
    }
}

#[async_trait]
impl KeyValueStore for RemoteKeyValueStore {
    async fn write(&self, request: WriteRequest) -> Result<WriteResult, KeyValueStoreError> {
        match self.call(Request::Write(request)).await? {
            Response::Write(result) => Ok(result),
            other => Err(unexpected(&other)),
        }
    }

    async fn read(&self, request: ReadRequest) -> Result<ReadResult, KeyValueStoreError> {
        match self.call(Request::Read(request)).await? {
            Response::Read(result) => Ok(result),
            other => Err(unexpected(&other)),
        }
    }

    async fn delete(&self, request: DeleteRequest) -> Result<DeleteResult, KeyValueStoreError> {
        match self.call(Request::Delete(request)).await? {
            Response::Delete(result) => Ok(result),
            other => Err(unexpected(&other)),
        }
    }
}
