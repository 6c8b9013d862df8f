use crate::client::{AllReduce, TreeClient};
use crate::cluster::ConnectionSet;
use crate::config::SpanConfig;
use crate::error::Result;
use crate::types::{CoordinatorEndpoint, NodeIdentity};
use bytemuck::Pod;

/// Blocking wrapper around [`TreeClient`].
///
/// Owns a single-threaded `tokio::runtime::Runtime` and calls `block_on()`
/// for each operation, so a node makes one blocking call per all-reduce
/// with no worker threads behind it.
pub struct SocketAllReduce {
    inner: TreeClient,
    rt: tokio::runtime::Runtime,
}

impl SocketAllReduce {
    /// Create a node configured from the environment.
    pub fn new(identity: NodeIdentity, endpoint: CoordinatorEndpoint) -> Result<Self> {
        Self::from_async(TreeClient::new(identity, endpoint))
    }

    pub fn with_config(
        identity: NodeIdentity,
        endpoint: CoordinatorEndpoint,
        config: SpanConfig,
    ) -> Result<Self> {
        Self::from_async(TreeClient::with_config(identity, endpoint, config))
    }

    /// Wrap an existing async client with a new runtime.
    pub fn from_async(inner: TreeClient) -> Result<Self> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self { inner, rt })
    }

    /// See [`TreeClient::set_endpoint`].
    pub fn set_endpoint(&mut self, endpoint: CoordinatorEndpoint) {
        self.inner.set_endpoint(endpoint);
    }

    pub fn endpoint(&self) -> &CoordinatorEndpoint {
        self.inner.endpoint()
    }

    /// See [`TreeClient::connections`].
    pub fn connections(&self) -> Option<&ConnectionSet> {
        self.inner.connections()
    }

    /// Join the tree now instead of on the first call.
    pub fn connect(&mut self) -> Result<()> {
        self.rt.block_on(self.inner.connect()).map(|_| ())
    }

    /// Close the current connections.
    pub fn disconnect(&mut self) {
        self.inner.disconnect();
    }
}

impl AllReduce for SocketAllReduce {
    fn identity(&self) -> &NodeIdentity {
        self.inner.identity()
    }

    fn all_reduce<T, F>(&mut self, buf: &mut [T], op: F) -> Result<()>
    where
        T: Pod + Send,
        F: Fn(T, T) -> T,
    {
        self.rt.block_on(self.inner.all_reduce(buf, op))
    }
}
