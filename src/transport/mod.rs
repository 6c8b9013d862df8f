//! Connection primitives: the fixed-width wire codec, the children
//! listener with its incrementing bind, and retrying connects.

mod connection;
mod listener;
mod wire;

pub use connection::{connect, connect_with_retry};
pub use listener::ChildListener;
pub use wire::WireStream;
