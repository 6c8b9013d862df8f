use crate::cluster::topology;
use crate::error::{Result, SpanError};
use crate::transport::WireStream;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};

/// Largest session the coordinator accepts. Anything bigger is refused
/// before slots are allocated for it.
pub const MAX_SESSION_NODES: u64 = 1 << 16;

/// Parent address and port handed to a node once its session is complete.
type ParentInfo = (Option<Ipv4Addr>, u16);

/// A local coordinator that arranges registering nodes into a binary tree.
///
/// Nodes register per session id. Once all `total` nodes of a session have
/// reported their listen ports, each one is told where its parent listens.
/// A duplicate node index, a total that disagrees with the session's first
/// registrant, or a total above [`MAX_SESSION_NODES`] is refused with a zero
/// ok flag. A node that disconnects before its session forms frees its
/// slot for a replacement.
pub struct SpanServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    sessions: Arc<Mutex<HashMap<u64, Session>>>,
}

struct Session {
    total: u64,
    slots: Vec<Slot>,
    ready: u64,
}

/// A node index within a session. Claimed slots remember the connection
/// that claimed them.
enum Slot {
    Empty,
    Reserved {
        peer: SocketAddr,
    },
    Ready {
        peer: SocketAddr,
        ip: Ipv4Addr,
        port: u16,
        reply: oneshot::Sender<ParentInfo>,
    },
}

/// Sent by a registration task after it has answered its node.
struct Answered {
    session_id: u64,
    total: u64,
}

impl SpanServer {
    /// Bind the coordinator listener.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| SpanError::transport("bind coordinator", addr, e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| SpanError::transport("local_addr", addr, e))?;
        Ok(Self {
            listener,
            local_addr,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// The address nodes should connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve registrations forever.
    pub async fn serve(&self) -> Result<()> {
        self.serve_until(None).await
    }

    /// Serve until `sessions` sessions have been formed and every node in
    /// them has been answered.
    pub async fn serve_sessions(&self, sessions: usize) -> Result<()> {
        self.serve_until(Some(sessions)).await
    }

    async fn serve_until(&self, limit: Option<usize>) -> Result<()> {
        let (answered_tx, mut answered_rx) = mpsc::unbounded_channel::<Answered>();
        let mut answered: HashMap<u64, u64> = HashMap::new();
        let mut completed = 0usize;

        while limit.is_none_or(|l| completed < l) {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted
                        .map_err(|e| SpanError::transport("accept node", self.local_addr, e))?;
                    let sessions = Arc::clone(&self.sessions);
                    let answered_tx = answered_tx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = register(stream, peer, sessions, answered_tx).await {
                            tracing::warn!(%peer, "registration failed: {e}");
                        }
                    });
                }
                Some(done) = answered_rx.recv() => {
                    let count = answered.entry(done.session_id).or_insert(0);
                    *count += 1;
                    if *count == done.total {
                        answered.remove(&done.session_id);
                        completed += 1;
                    }
                }
            }
        }
        Ok(())
    }
}

async fn register(
    stream: TcpStream,
    peer: SocketAddr,
    sessions: Arc<Mutex<HashMap<u64, Session>>>,
    answered: mpsc::UnboundedSender<Answered>,
) -> Result<()> {
    let ip = match peer.ip() {
        IpAddr::V4(ip) => ip,
        IpAddr::V6(ip) => ip.to_ipv4_mapped().ok_or_else(|| {
            SpanError::MalformedHandshake(format!("node {peer} has no IPv4 address"))
        })?,
    };
    let mut wire = WireStream::new(stream, peer.to_string());

    let session_id = wire.recv_u64("receive session id").await?;
    let total = wire.recv_u64("receive total").await?;
    let node = wire.recv_u64("receive node index").await?;

    if !reserve(&sessions, peer, session_id, total, node)? {
        tracing::warn!(session_id, node, total, "refusing registration");
        wire.send_i32(0, "send ok flag").await?;
        return Ok(());
    }

    match answer(&mut wire, &sessions, peer, ip, session_id, total, node).await {
        Ok(()) => {
            let _ = answered.send(Answered { session_id, total });
            Ok(())
        }
        Err(e) => {
            release(&sessions, peer, session_id, node);
            Err(e)
        }
    }
}

/// Claim `node`'s slot in the session, creating the session on first
/// contact. Returns `false` when the registration must be refused.
fn reserve(
    sessions: &Mutex<HashMap<u64, Session>>,
    peer: SocketAddr,
    session_id: u64,
    total: u64,
    node: u64,
) -> Result<bool> {
    if total == 0 || total > MAX_SESSION_NODES {
        return Ok(false);
    }

    let mut map = sessions
        .lock()
        .map_err(|_| SpanError::LockPoisoned("coordinator sessions"))?;
    let session = map.entry(session_id).or_insert_with(|| Session {
        total,
        slots: (0..total).map(|_| Slot::Empty).collect(),
        ready: 0,
    });
    match session.slots.get_mut(node as usize) {
        Some(slot @ Slot::Empty) if session.total == total => {
            *slot = Slot::Reserved { peer };
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Finish a reserved registration: hand out the child count, collect the
/// listen port, then wait for the session to fill and send the parent.
async fn answer(
    wire: &mut WireStream<TcpStream>,
    sessions: &Mutex<HashMap<u64, Session>>,
    peer: SocketAddr,
    ip: Ipv4Addr,
    session_id: u64,
    total: u64,
    node: u64,
) -> Result<()> {
    wire.send_i32(1, "send ok flag").await?;
    wire.send_u16(topology::child_count(node, total), "send child count")
        .await?;
    let port = wire.recv_u16("receive listen port").await?;

    let (reply_tx, reply_rx) = oneshot::channel();
    {
        let mut map = sessions
            .lock()
            .map_err(|_| SpanError::LockPoisoned("coordinator sessions"))?;
        let complete = match map.get_mut(&session_id) {
            Some(session) => {
                session.slots[node as usize] = Slot::Ready {
                    peer,
                    ip,
                    port,
                    reply: reply_tx,
                };
                session.ready += 1;
                session.ready == session.total
            }
            None => false,
        };
        if complete {
            if let Some(session) = map.remove(&session_id) {
                dispatch_parents(session_id, session);
            }
        }
    }

    // The node sends nothing while it waits, so a readable socket means it
    // has gone away.
    let (parent_ip, parent_port) = tokio::select! {
        reply = reply_rx => reply.map_err(|_| {
            SpanError::MalformedHandshake(format!("session {session_id} abandoned"))
        })?,
        gone = wire.wait_closed("wait for session") => return Err(gone),
    };
    wire.send_ipv4(parent_ip, "send parent address").await?;
    wire.send_u16(parent_port, "send parent port").await?;
    Ok(())
}

/// Give back the slot `peer` claimed if its session has not formed yet.
/// Dropping the last claim on a session forgets it.
fn release(
    sessions: &Mutex<HashMap<u64, Session>>,
    peer: SocketAddr,
    session_id: u64,
    node: u64,
) {
    let mut map = sessions.lock().unwrap_or_else(PoisonError::into_inner);
    let Some(session) = map.get_mut(&session_id) else {
        return;
    };
    let Some(slot) = session.slots.get_mut(node as usize) else {
        return;
    };
    match slot {
        Slot::Reserved { peer: owner } if *owner == peer => {}
        Slot::Ready { peer: owner, .. } if *owner == peer => session.ready -= 1,
        _ => return,
    }
    *slot = Slot::Empty;
    if session.slots.iter().all(|s| matches!(s, Slot::Empty)) {
        map.remove(&session_id);
    }
    tracing::debug!(session_id, node, "released registration slot");
}

/// Tell every member of a complete session where its parent listens.
fn dispatch_parents(session_id: u64, session: Session) {
    let listeners: Vec<(Ipv4Addr, u16)> = session
        .slots
        .iter()
        .map(|slot| match slot {
            Slot::Ready { ip, port, .. } => (*ip, *port),
            Slot::Empty | Slot::Reserved { .. } => (Ipv4Addr::UNSPECIFIED, 0),
        })
        .collect();

    for (node, slot) in session.slots.into_iter().enumerate() {
        if let Slot::Ready { reply, .. } = slot {
            let info = match topology::parent_of(node as u64) {
                None => (None, 0),
                Some(parent) => {
                    let (ip, port) = listeners[parent as usize];
                    (Some(ip), port)
                }
            };
            let _ = reply.send(info);
        }
    }

    tracing::info!(
        session_id,
        total = session.total,
        depth = topology::depth(session.total),
        "session formed"
    );
}
