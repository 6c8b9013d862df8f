//! Streaming engines moving a transfer buffer up and down the tree.
//!
//! Both engines are generic over the stream type so they run over TCP in
//! production and over in-memory pipes in tests.

mod broadcast;
mod reduce;

pub use broadcast::stream_broadcast;
pub use reduce::stream_reduce;
