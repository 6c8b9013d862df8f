use crate::cluster::ConnectionSet;
use crate::error::{Result, SpanError};
use bytemuck::Pod;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Receive state for one child slot during a reduce pass.
///
/// `read_pos` counts bytes received; the trailing `leftover` of those bytes
/// do not yet form a whole element and sit at the front of `ahead` until
/// the rest arrives. An absent child starts fully read.
struct ChildCursor<'a, S> {
    label: &'static str,
    conn: Option<&'a mut S>,
    read_pos: usize,
    leftover: usize,
    ahead: Vec<u8>,
}

impl<'a, S: AsyncRead + Unpin> ChildCursor<'a, S> {
    fn new(
        label: &'static str,
        conn: Option<&'a mut S>,
        total: usize,
        chunk: usize,
        elem_size: usize,
    ) -> Self {
        let (read_pos, ahead) = match conn {
            Some(_) => (0, vec![0u8; chunk + elem_size]),
            None => (total, Vec::new()),
        };
        Self {
            label,
            conn,
            read_pos,
            leftover: 0,
            ahead,
        }
    }

    /// Bytes received from this child and already folded into the buffer.
    fn combined(&self) -> usize {
        self.read_pos - self.leftover
    }

    fn is_drained(&self, total: usize) -> bool {
        self.read_pos == total
    }

    /// Read the next slice from this child into the read-ahead array.
    ///
    /// Never resolves for an absent or drained child, so it can sit in a
    /// `select!` next to a child that still owes data.
    async fn fill(&mut self, total: usize, chunk: usize) -> std::io::Result<usize> {
        match self.conn.as_deref_mut() {
            Some(conn) if self.read_pos < total => {
                let want = chunk.min(total - self.read_pos);
                let start = self.leftover;
                conn.read(&mut self.ahead[start..start + want]).await
            }
            _ => std::future::pending().await,
        }
    }

    /// Fold every whole element now available into `buf`, then keep the
    /// partial tail for the next read.
    fn absorb<T: Pod, F: Fn(T, T) -> T>(&mut self, got: usize, buf: &mut [T], op: &F) {
        let elem_size = std::mem::size_of::<T>();
        let first = self.combined() / elem_size;
        let avail = self.leftover + got;
        let whole = avail - avail % elem_size;

        for (k, bytes) in self.ahead[..whole].chunks_exact(elem_size).enumerate() {
            let idx = first + k;
            buf[idx] = op(buf[idx], bytemuck::pod_read_unaligned(bytes));
        }

        self.read_pos += got;
        self.leftover = avail - whole;
        self.ahead.copy_within(whole..avail, 0);
    }
}

/// Streaming reduce: fold both children's buffers into `buf` and forward
/// the combined prefix to the parent as it becomes ready.
///
/// Bytes go up only once every present child has delivered the whole
/// elements covering them, so the parent never sees a half-combined
/// element. At the root `buf` ends up holding the fully combined vector;
/// elsewhere it holds this subtree's partial result, which the broadcast
/// pass later overwrites.
///
/// A child that closes its connection while still owing bytes is an error.
pub async fn stream_reduce<T, F, S>(
    buf: &mut [T],
    conns: &mut ConnectionSet<S>,
    op: F,
    chunk_size: usize,
) -> Result<()>
where
    T: Pod,
    F: Fn(T, T) -> T,
    S: AsyncRead + AsyncWrite + Unpin,
{
    let elem_size = std::mem::size_of::<T>();
    let total = std::mem::size_of_val(buf);
    let chunk = chunk_size.max(1);

    let ConnectionSet { parent, children } = conns;
    let [left, right] = children;
    let mut kids = [
        ChildCursor::new("child 0", left.as_mut(), total, chunk, elem_size),
        ChildCursor::new("child 1", right.as_mut(), total, chunk, elem_size),
    ];
    let mut sent = if parent.is_some() { 0 } else { total };

    loop {
        if let Some(parent) = parent.as_mut() {
            let ready = kids[0].combined().min(kids[1].combined());
            if ready > sent {
                let end = ready.min(sent + chunk);
                let bytes: &[u8] = bytemuck::cast_slice(&*buf);
                parent
                    .write_all(&bytes[sent..end])
                    .await
                    .map_err(|e| SpanError::transport("reduce: send to parent", "parent", e))?;
                sent = end;
                tracing::trace!(sent, total, "reduce: forwarded to parent");
            }
        }

        if kids.iter().all(|k| k.is_drained(total)) {
            if sent == total {
                break;
            }
            continue;
        }

        let [k0, k1] = &mut kids;
        let (which, got) = tokio::select! {
            got = k0.fill(total, chunk) => (0, got),
            got = k1.fill(total, chunk) => (1, got),
        };

        let kid = &mut kids[which];
        let got =
            got.map_err(|e| SpanError::transport("reduce: receive from child", kid.label, e))?;
        if got == 0 {
            return Err(SpanError::PeerClosed {
                operation: "reduce",
                peer: kid.label.to_string(),
                position: kid.read_pos,
                expected: total,
            });
        }
        kid.absorb(got, buf, &op);
        tracing::trace!(child = which, read = kid.read_pos, total, "reduce: combined");
    }

    if let Some(parent) = parent.as_mut() {
        parent
            .flush()
            .await
            .map_err(|e| SpanError::transport("reduce: flush to parent", "parent", e))?;
    }

    Ok(())
}
