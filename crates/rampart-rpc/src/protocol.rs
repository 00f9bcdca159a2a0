//! Wire protocol.
//!
//! `encode`/`decode` produce and consume bare JSON; `write_message` and
//! `read_message` add and strip the length prefix.

use rampart_constants::MAX_MESSAGE_SIZE;
use rampart_kv_types::DeleteRequest;
use rampart_kv_types::DeleteResult;
use rampart_kv_types::KeyValueStoreError;
use rampart_kv_types::ReadRequest;
use rampart_kv_types::ReadResult;
use rampart_kv_types::WriteRequest;
use rampart_kv_types::WriteResult;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;

/// Client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    Ping,
    Read(ReadRequest),
    Write(WriteRequest),
    Delete(DeleteRequest),
}

/// Server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    Pong,
    Read(ReadResult),
    Write(WriteResult),
    Delete(DeleteResult),
    /// The store rejected or failed the request.
    Error { error: KeyValueStoreError },
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message of {size} bytes exceeds maximum of {max}")]
    MessageTooLarge { size: usize, max: u32 },
    #[error("connection closed")]
    ConnectionClosed,
    #[error("operation timed out")]
    Timeout,
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, ProtocolError> {
    Ok(serde_json::to_vec(msg)?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Write one length-prefixed frame.
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, data: &[u8]) -> Result<(), ProtocolError> {
    if data.len() > MAX_MESSAGE_SIZE as usize {
        return Err(ProtocolError::MessageTooLarge {
            size: data.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    writer.write_all(&(data.len() as u32).to_be_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame.
///
/// A clean EOF before the length prefix is `ConnectionClosed`.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, ProtocolError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(ProtocolError::ConnectionClosed),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf);
    if len > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: len as usize,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_returns_json_without_length_prefix() {
        let encoded = encode(&Response::Pong).unwrap();
        let json_str = std::str::from_utf8(&encoded).unwrap();
        assert!(json_str.starts_with('{'), "should be JSON object: {json_str}");
    }

    #[test]
    fn error_response_carries_store_error() {
        let response = Response::Error {
            error: KeyValueStoreError::CompareAndSwapFailed {
                key: "lock:a".into(),
                actual: Some("t1".into()),
            },
        };
        let decoded: Response = decode(&encode(&response).unwrap()).unwrap();
        assert_eq!(response, decoded);
    }

    #[tokio::test]
    async fn frames_are_length_prefixed() {
        let data = encode(&Request::Read(ReadRequest::new("k"))).unwrap();
        let mut buf = Vec::new();
        write_message(&mut buf, &data).await.unwrap();

        assert_eq!(&buf[..4], &(data.len() as u32).to_be_bytes());
        let mut reader = buf.as_slice();
        let frame = read_message(&mut reader).await.unwrap();
        assert_eq!(frame, data);
    }

    #[tokio::test]
    async fn oversized_length_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_MESSAGE_SIZE + 1).to_be_bytes());
        let mut reader = buf.as_slice();
        let err = read_message(&mut reader).await.unwrap_err();
        assert!(matches!(err, ProtocolError::MessageTooLarge { .. }));
    }

    #[tokio::test]
    async fn empty_stream_is_closed() {
        let mut reader: &[u8] = &[];
        let err = read_message(&mut reader).await.unwrap_err();
        assert!(matches!(err, ProtocolError::ConnectionClosed));
    }
}
