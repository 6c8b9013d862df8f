mod sync_client;
mod tree_client;

pub use sync_client::SocketAllReduce;
pub use tree_client::TreeClient;

use crate::error::Result;
use crate::types::NodeIdentity;
use bytemuck::Pod;

/// A backend able to all-reduce a buffer across every participant.
///
/// After `all_reduce` returns `Ok`, every participant's buffer holds the
/// same element-wise combination of all participants' inputs.
pub trait AllReduce {
    /// Who this participant is.
    fn identity(&self) -> &NodeIdentity;

    /// Combine `buf` with every other participant's buffer using `op`.
    fn all_reduce<T, F>(&mut self, buf: &mut [T], op: F) -> Result<()>
    where
        T: Pod + Send,
        F: Fn(T, T) -> T;
}
