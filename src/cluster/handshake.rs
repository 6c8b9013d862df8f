use crate::config::SpanConfig;
use crate::error::{Result, SpanError};
use crate::transport::{ChildListener, WireStream, connect, connect_with_retry};
use crate::types::{CoordinatorEndpoint, NodeIdentity};
use std::net::{IpAddr, SocketAddr};
use tokio::net::TcpStream;

/// One node's links in the reduction tree.
///
/// Exactly one of "is root" and "has a parent" holds. Dropping the set
/// closes every connection in it.
#[derive(Debug)]
pub struct ConnectionSet<S = TcpStream> {
    pub parent: Option<S>,
    pub children: [Option<S>; 2],
}

impl<S> ConnectionSet<S> {
    /// A root with no children: the whole tree is this one node.
    pub fn lonely() -> Self {
        Self {
            parent: None,
            children: [None, None],
        }
    }

    pub fn new(parent: Option<S>, children: [Option<S>; 2]) -> Self {
        Self { parent, children }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn child_count(&self) -> usize {
        self.children.iter().filter(|c| c.is_some()).count()
    }
}

impl<S> Default for ConnectionSet<S> {
    fn default() -> Self {
        Self::lonely()
    }
}

/// Register with the coordinator and build this node's connections.
///
/// The exchange is strictly sequential over a single coordinator
/// connection: identify, learn the child count, bind a listener and
/// report its port, learn the parent, connect to it, then accept the
/// children once the coordinator connection is closed.
pub async fn join_tree(
    endpoint: &CoordinatorEndpoint,
    identity: &NodeIdentity,
    config: &SpanConfig,
) -> Result<ConnectionSet> {
    let coordinator = endpoint.address();
    let stream = connect(&coordinator).await?;
    let mut wire = WireStream::new(stream, coordinator);

    wire.send_u64(endpoint.session_id, "send session id").await?;
    wire.send_u64(identity.total(), "send total").await?;
    wire.send_u64(identity.node(), "send node index").await?;

    let ok = wire.recv_i32("receive ok flag").await?;
    if ok == 0 {
        return Err(SpanError::DuplicateRegistration {
            session_id: endpoint.session_id,
            node: identity.node(),
        });
    }

    let child_count = wire.recv_u16("receive child count").await?;
    if child_count > 2 {
        return Err(SpanError::MalformedHandshake(format!(
            "coordinator assigned {child_count} children, at most 2 allowed"
        )));
    }

    let listener = if child_count > 0 {
        let listener = ChildListener::bind_incrementing(
            config.listen_addr,
            config.base_port,
            u32::from(child_count),
        )?;
        if !identity.quiet() {
            tracing::info!(
                node = identity.node(),
                port = listener.port(),
                "listening for {child_count} children"
            );
        }
        Some(listener)
    } else {
        None
    };

    let port = listener.as_ref().map_or(0, ChildListener::port);
    wire.send_u16(port, "send listen port").await?;

    let parent_ip = wire.recv_ipv4("receive parent address").await?;
    let parent_port = wire.recv_u16("receive parent port").await?;

    let parent = match parent_ip {
        None => None,
        Some(ip) => {
            let addr = SocketAddr::new(IpAddr::V4(ip), parent_port);
            let stream =
                connect_with_retry(addr, config.connect_retries, config.connect_retry_delay)
                    .await?;
            if !identity.quiet() {
                tracing::info!(node = identity.node(), %addr, "connected to parent");
            }
            Some(stream)
        }
    };

    drop(wire);

    let mut children: [Option<TcpStream>; 2] = [None, None];
    if let Some(listener) = listener {
        for slot in children.iter_mut().take(usize::from(child_count)) {
            let (stream, addr) = listener.accept().await?;
            if !identity.quiet() {
                tracing::info!(node = identity.node(), %addr, "child connected");
            }
            *slot = Some(stream);
        }
    }

    if !identity.quiet() {
        tracing::info!(
            node = identity.node(),
            total = identity.total(),
            root = parent.is_none(),
            children = child_count,
            "joined reduction tree via {endpoint}"
        );
    }

    Ok(ConnectionSet::new(parent, children))
}
