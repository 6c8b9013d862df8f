//! Spanning-tree all-reduce.
//!
//! Every node holds a vector of the same length. After
//! [`AllReduce::all_reduce`] returns, every node holds the element-wise
//! combination of all of them. Two backends share that contract:
//!
//! - [`SocketAllReduce`] / [`TreeClient`]: one process per node, arranged
//!   into a binary tree by a coordinator ([`SpanServer`]); data streams up
//!   the tree in fixed-size chunks and the result streams back down.
//! - [`ThreadAllReduce`]: threads of one process combining through shared
//!   memory behind a counting barrier.

pub mod client;
pub mod cluster;
pub mod collective;
pub mod config;
pub mod error;
pub mod threaded;
pub mod transport;
pub mod types;

pub use client::{AllReduce, SocketAllReduce, TreeClient};
pub use cluster::{ConnectionSet, SpanServer};
pub use config::SpanConfig;
pub use error::{Result, SpanError};
pub use threaded::ThreadAllReduce;
pub use types::{CoordinatorEndpoint, NodeIdentity, ReduceOp, Reducible};
