use crate::error::{Result, SpanError};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;

/// Connect once to `addr` (a `host:port` string, resolved by tokio).
pub async fn connect(addr: &str) -> Result<TcpStream> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| SpanError::ConnectionFailed {
            peer: addr.to_string(),
            reason: e.to_string(),
        })?;
    stream
        .set_nodelay(true)
        .map_err(|e| SpanError::transport("set_nodelay", addr, e))?;
    Ok(stream)
}

/// Connect to `addr`, retrying up to `attempts` times with `delay` between
/// attempts. Used for the parent link, whose listener may not be up yet.
pub async fn connect_with_retry(
    addr: SocketAddr,
    attempts: u32,
    delay: Duration,
) -> Result<TcpStream> {
    let attempts = attempts.max(1);
    let mut last_err = None;

    for attempt in 1..=attempts {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                stream
                    .set_nodelay(true)
                    .map_err(|e| SpanError::transport("set_nodelay", addr, e))?;
                return Ok(stream);
            }
            Err(e) => {
                tracing::debug!(%addr, attempt, "connect failed: {e}");
                last_err = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(SpanError::ConnectionFailed {
        peer: addr.to_string(),
        reason: format!(
            "gave up after {attempts} attempts: {}",
            last_err.map(|e| e.to_string()).unwrap_or_default()
        ),
    })
}
