use crate::cluster::{ConnectionSet, join_tree};
use crate::collective::{stream_broadcast, stream_reduce};
use crate::config::SpanConfig;
use crate::error::Result;
use crate::types::{CoordinatorEndpoint, NodeIdentity};
use bytemuck::Pod;

/// The async socket all-reduce facade for one node.
///
/// Joins the reduction tree on the first call and keeps the resulting
/// connections for as long as the coordinator endpoint stays the same.
/// Switching to a different endpoint drops the old connections, and the
/// next call handshakes again.
///
/// # Example
///
/// ```no_run
/// use spanreduce::{CoordinatorEndpoint, NodeIdentity, ReduceOp, TreeClient};
///
/// # async fn example() -> spanreduce::Result<()> {
/// let identity = NodeIdentity::new(4, 2, false)?;
/// let endpoint = CoordinatorEndpoint::with_default_port("10.0.0.1", 7);
/// let mut client = TreeClient::new(identity, endpoint);
///
/// let mut grad = vec![0.5f32; 1024];
/// client.all_reduce(&mut grad, ReduceOp::Sum.combiner()).await?;
/// # Ok(())
/// # }
/// ```
pub struct TreeClient {
    identity: NodeIdentity,
    config: SpanConfig,
    endpoint: CoordinatorEndpoint,
    /// Connections and the endpoint that produced them.
    tree: Option<(CoordinatorEndpoint, ConnectionSet)>,
}

impl TreeClient {
    /// Create a client configured from the environment.
    pub fn new(identity: NodeIdentity, endpoint: CoordinatorEndpoint) -> Self {
        Self::with_config(identity, endpoint, SpanConfig::from_env())
    }

    pub fn with_config(
        identity: NodeIdentity,
        endpoint: CoordinatorEndpoint,
        config: SpanConfig,
    ) -> Self {
        Self {
            identity,
            config,
            endpoint,
            tree: None,
        }
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn config(&self) -> &SpanConfig {
        &self.config
    }

    /// The endpoint the next call will use.
    pub fn endpoint(&self) -> &CoordinatorEndpoint {
        &self.endpoint
    }

    /// Point the client at another coordinator or session. Takes effect on
    /// the next call; an equal endpoint keeps the current connections.
    pub fn set_endpoint(&mut self, endpoint: CoordinatorEndpoint) {
        self.endpoint = endpoint;
    }

    /// Current connections, if a handshake has completed for the
    /// configured endpoint.
    pub fn connections(&self) -> Option<&ConnectionSet> {
        match &self.tree {
            Some((endpoint, set)) if *endpoint == self.endpoint => Some(set),
            _ => None,
        }
    }

    /// Join the tree for the configured endpoint unless already joined.
    pub async fn connect(&mut self) -> Result<&mut ConnectionSet> {
        if let Some((old, _)) = &self.tree {
            if *old != self.endpoint {
                if !self.identity.quiet() {
                    tracing::info!(
                        node = self.identity.node(),
                        "coordinator changed from {old} to {}, rejoining",
                        self.endpoint
                    );
                }
                self.tree = None;
            }
        }

        let set = match self.tree.take() {
            Some((_, set)) => set,
            None => join_tree(&self.endpoint, &self.identity, &self.config).await?,
        };
        let (_, set) = self.tree.insert((self.endpoint.clone(), set));
        Ok(set)
    }

    /// Drop the current connections, closing their sockets.
    pub fn disconnect(&mut self) {
        self.tree = None;
    }

    /// Combine `buf` element-wise with every other node's buffer using
    /// `op`. On success every node holds the same combined vector.
    ///
    /// Any error leaves the tree in an unknown state, so the connections
    /// are dropped; the whole job is expected to restart.
    pub async fn all_reduce<T, F>(&mut self, buf: &mut [T], op: F) -> Result<()>
    where
        T: Pod,
        F: Fn(T, T) -> T,
    {
        let chunk = self.config.chunk_size;
        let set = self.connect().await?;

        let result = async {
            stream_reduce(buf, set, op, chunk).await?;
            stream_broadcast(buf, set, chunk).await
        }
        .await;

        if result.is_err() {
            self.disconnect();
        }
        result
    }
}
