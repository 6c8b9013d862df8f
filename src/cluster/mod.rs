mod coordinator;
mod handshake;
pub mod topology;

pub use coordinator::SpanServer;
pub use handshake::{ConnectionSet, join_tree};
