//! TCP server exposing a coordination store.

use std::sync::Arc;

use rampart_constants::network::MAX_SERVER_CONNECTIONS;
use rampart_core::KeyValueStore;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::protocol;
use crate::protocol::ProtocolError;
use crate::protocol::Request;
use crate::protocol::Response;

/// Accept connections on `listener` until `cancel` fires.
///
/// Each connection runs on its own task. At most
/// `MAX_SERVER_CONNECTIONS` connections are served concurrently; further
/// accepts wait for a slot.
pub async fn serve(
    listener: TcpListener,
    store: Arc<dyn KeyValueStore>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let slots = Arc::new(Semaphore::new(MAX_SERVER_CONNECTIONS));
    info!(addr = ?listener.local_addr().ok(), "coordination store listening");

    loop {
        let permit = tokio::select! {
            _ = cancel.cancelled() => break,
            permit = slots.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let (stream, peer) = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted?,
        };

        let store = store.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = handle_connection(stream, store, cancel).await {
                warn!(%peer, error = %e, "connection ended with error");
            }
        });
    }

    info!("coordination store stopped accepting connections");
    Ok(())
}

/// Serve request/response pairs on one connection until the peer hangs up.
async fn handle_connection(
    stream: TcpStream,
    store: Arc<dyn KeyValueStore>,
    cancel: CancellationToken,
) -> Result<(), ProtocolError> {
    stream.set_nodelay(true)?;
    let (mut reader, mut writer) = stream.into_split();

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            frame = protocol::read_message(&mut reader) => frame,
        };
        let bytes = match frame {
            Ok(bytes) => bytes,
            Err(ProtocolError::ConnectionClosed) => {
                debug!("client disconnected");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let request: Request = protocol::decode(&bytes)?;
        let response = handle_request(store.as_ref(), request).await;
        protocol::write_message(&mut writer, &protocol::encode(&response)?).await?;
    }
}

async fn handle_request(store: &dyn KeyValueStore, request: Request) -> Response {
    let result = match request {
        Request::Ping => return Response::Pong,
        Request::Read(req) => store.read(req).await.map(Response::Read),
        Request::Write(req) => store.write(req).await.map(Response::Write),
        Request::Delete(req) => store.delete(req).await.map(Response::Delete),
    };
    result.unwrap_or_else(|error| Response::Error { error })
}
