//! Per-connection orchestration: filter available backends, select one,
//! account for the connection, and relay request then response.

use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use super::forwarder::{relay_message, Direction};
use crate::balancer::{BackendSet, SelectionPolicy};
use crate::error::CrossbarResult;

/// Timeout for establishing the backend connection
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Per-read timeout on the backend connection
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Handle one accepted client connection end-to-end.
///
/// Errors never escape a handler; they are logged and both sockets close on
/// drop.
pub async fn handle_connection(
    mut client: TcpStream,
    client_ip: String,
    backends: &BackendSet,
    policy: &SelectionPolicy,
) {
    if let Err(e) = serve(&mut client, &client_ip, backends, policy).await {
        debug!("Connection from {} ended with error: {}", client_ip, e);
    }
}

async fn serve(
    client: &mut TcpStream,
    client_ip: &str,
    backends: &BackendSet,
    policy: &SelectionPolicy,
) -> CrossbarResult<()> {
    let available = backends.available();
    if available.is_empty() {
        error!("No available backends");
        return send_unavailable(client).await;
    }

    let Some(backend) = policy.select(&available, client_ip) else {
        error!("Failed to select a backend");
        return send_unavailable(client).await;
    };

    // Held for the rest of the handler; released on every exit path
    let _lease = backend.lease();

    let mut upstream = match timeout(
        CONNECT_TIMEOUT,
        TcpStream::connect((backend.host(), backend.port())),
    )
    .await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            warn!("Failed to connect to backend {}: {}", backend.address(), e);
            return Ok(());
        }
        Err(_) => {
            warn!(
                "Timed out connecting to backend {} after {:?}",
                backend.address(),
                CONNECT_TIMEOUT
            );
            return Ok(());
        }
    };

    relay(client, &mut upstream).await?;
    debug!("Request from {} routed to {}", client_ip, backend.address());
    Ok(())
}

/// Request then response, strictly in that order; no duplex interleaving is
/// needed for HTTP/1.1 without pipelining.
async fn relay(client: &mut TcpStream, upstream: &mut TcpStream) -> CrossbarResult<()> {
    let (client_read, mut client_write) = client.split();
    let (upstream_read, mut upstream_write) = upstream.split();

    let mut client_read = BufReader::new(client_read);
    let mut upstream_read = BufReader::new(upstream_read);

    relay_message(
        &mut client_read,
        &mut upstream_write,
        Direction::Request,
        None,
    )
    .await?;

    relay_message(
        &mut upstream_read,
        &mut client_write,
        Direction::Response,
        Some(READ_TIMEOUT),
    )
    .await?;

    Ok(())
}

/// Minimal 503 the proxy originates itself when no backend is selectable
async fn send_unavailable(client: &mut TcpStream) -> CrossbarResult<()> {
    const REASON: &str = "Service Unavailable";
    let response = format!(
        "HTTP/1.1 503 {reason}\r\nContent-Type: text/plain\r\nContent-Length: {length}\r\nConnection: close\r\n\r\n{reason}",
        reason = REASON,
        length = REASON.len(),
    );
    client.write_all(response.as_bytes()).await?;
    client.flush().await?;
    Ok(())
}
