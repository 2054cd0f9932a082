//! TCP accept loop and per-connection line protocol.
//!
//! Each line a client sends is one JSON request; each reply is one JSON line.
//! Connections are served concurrently, one task each, all sharing a single
//! [`Gateway`].

use std::{future::Future, io, net::SocketAddr};

use expedientes_records::{Gateway, Response, ServiceError};
use expedientes_storage::StorageBackend;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpListener,
    task::JoinSet,
};

/// Longest request line accepted, newline included.
pub const MAX_REQUEST_BYTES: u64 = 1024 * 1024;

/// Accepts connections until `shutdown` resolves.
///
/// When `shutdown` fires the listener stops accepting and every open
/// connection task is aborted before this returns. Closing the engine is
/// left to the caller.
///
/// # Errors
///
/// Currently infallible; accept failures are logged and the loop continues.
pub async fn serve<B, F>(listener: TcpListener, gateway: Gateway<B>, shutdown: F) -> io::Result<()>
where
    B: StorageBackend + Clone + 'static,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let gateway = gateway.clone();
                    connections.spawn(async move {
                        let (reader, writer) = stream.into_split();
                        if let Err(e) = handle_connection(reader, writer, peer, &gateway).await {
                            tracing::debug!(%peer, error = %e, "connection ended with error");
                        }
                    });
                },
                Err(e) => tracing::warn!(error = %e, "accept failed"),
            },
            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = finished {
                    tracing::error!(error = %e, "connection task panicked");
                }
            },
        }
    }

    tracing::info!(open_connections = connections.len(), "stopped accepting connections");
    connections.shutdown().await;
    Ok(())
}

/// Serves one client until it disconnects.
///
/// Blank lines are skipped. A line that is not UTF-8 gets an
/// `invalid_argument` reply. A line longer than [`MAX_REQUEST_BYTES`] gets
/// an `invalid_argument` reply and the connection is closed.
///
/// # Errors
///
/// Returns the I/O error that ended the connection.
#[tracing::instrument(skip_all, fields(%peer))]
pub async fn handle_connection<R, W, B>(
    reader: R,
    mut writer: W,
    peer: SocketAddr,
    gateway: &Gateway<B>,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    B: StorageBackend + Clone,
{
    tracing::debug!("connection opened");
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    loop {
        line.clear();
        let read = (&mut reader).take(MAX_REQUEST_BYTES).read_until(b'\n', &mut line).await?;
        if read == 0 {
            break;
        }

        let complete = line.ends_with(b"\n");
        if !complete && read as u64 == MAX_REQUEST_BYTES {
            let err = ServiceError::invalid_argument(format!("request exceeds {MAX_REQUEST_BYTES} bytes"));
            tracing::info!(error = %err, "closing connection");
            reply(&mut writer, &Response::failure(&err)).await?;
            break;
        }

        let response = match std::str::from_utf8(&line) {
            Ok(text) if text.trim().is_empty() => continue,
            Ok(text) => gateway.handle_line(text.trim_end()).await,
            Err(_) => Response::failure(&ServiceError::invalid_argument("request is not valid UTF-8")),
        };
        reply(&mut writer, &response).await?;
    }

    tracing::debug!("connection closed");
    Ok(())
}

async fn reply<W: AsyncWrite + Unpin>(writer: &mut W, response: &Response) -> io::Result<()> {
    let mut encoded = response.to_line();
    encoded.push('\n');
    writer.write_all(encoded.as_bytes()).await?;
    writer.flush().await
}
