use crate::cluster::ConnectionSet;
use crate::error::{Result, SpanError};
use bytemuck::Pod;
use futures::future::try_join_all;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Streaming broadcast: relay the root's buffer down the tree.
///
/// A node receives from its parent straight into `buf` and pushes every
/// received prefix on to its children. The root starts with everything
/// received; a leaf starts with everything sent. No combining happens, so
/// chunk boundaries may split elements freely.
pub async fn stream_broadcast<T, S>(
    buf: &mut [T],
    conns: &mut ConnectionSet<S>,
    chunk_size: usize,
) -> Result<()>
where
    T: Pod,
    S: AsyncRead + AsyncWrite + Unpin,
{
    let total = std::mem::size_of_val(buf);
    let chunk = chunk_size.max(1);
    let bytes: &mut [u8] = bytemuck::cast_slice_mut(buf);

    let ConnectionSet { parent, children } = conns;
    let has_children = children.iter().any(Option::is_some);
    let mut received = if parent.is_some() { 0 } else { total };
    let mut sent = if has_children { 0 } else { total };

    while received < total || sent < total {
        if received > sent {
            let end = received.min(sent + chunk);
            let slice = &bytes[sent..end];
            try_join_all(children.iter_mut().flatten().map(|c| c.write_all(slice)))
                .await
                .map_err(|e| SpanError::transport("broadcast: send to child", "children", e))?;
            sent = end;
            tracing::trace!(sent, total, "broadcast: forwarded to children");
        }

        if let Some(parent) = parent.as_mut() {
            if received < total {
                let end = total.min(received + chunk);
                let got = parent
                    .read(&mut bytes[received..end])
                    .await
                    .map_err(|e| {
                        SpanError::transport("broadcast: receive from parent", "parent", e)
                    })?;
                if got == 0 {
                    return Err(SpanError::PeerClosed {
                        operation: "broadcast",
                        peer: "parent".to_string(),
                        position: received,
                        expected: total,
                    });
                }
                received += got;
            }
        }
    }

    if has_children {
        try_join_all(children.iter_mut().flatten().map(|c| c.flush()))
            .await
            .map_err(|e| SpanError::transport("broadcast: flush to child", "children", e))?;
    }

    Ok(())
}
