use crate::error::{Result, SpanError};

/// Port the coordinator listens on unless told otherwise.
pub const DEFAULT_COORDINATOR_PORT: u16 = 26543;

/// Parent address sent by the coordinator to the tree root.
pub const NO_PARENT: u32 = 0xFFFF_FFFF;

/// Immutable identity of one participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeIdentity {
    total: u64,
    node: u64,
    quiet: bool,
}

impl NodeIdentity {
    /// Fails when `total` is zero or `node` is not below `total`.
    pub fn new(total: u64, node: u64, quiet: bool) -> Result<Self> {
        if total == 0 || node >= total {
            return Err(SpanError::InvalidNode { node, total });
        }
        Ok(Self { total, node, quiet })
    }

    /// Number of participants.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// This participant's 0-based index.
    pub fn node(&self) -> u64 {
        self.node
    }

    /// Whether informational logging is suppressed.
    pub fn quiet(&self) -> bool {
        self.quiet
    }
}

/// Where to find the coordinator, and which session to join.
///
/// A node keeps the endpoint that produced its current connections; a call
/// with an equal endpoint reuses them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CoordinatorEndpoint {
    pub host: String,
    pub port: u16,
    pub session_id: u64,
}

impl CoordinatorEndpoint {
    pub fn new(host: impl Into<String>, port: u16, session_id: u64) -> Self {
        Self {
            host: host.into(),
            port,
            session_id,
        }
    }

    /// Endpoint on the default coordinator port.
    pub fn with_default_port(host: impl Into<String>, session_id: u64) -> Self {
        Self::new(host, DEFAULT_COORDINATOR_PORT, session_id)
    }

    /// `host:port`, as passed to the resolver.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for CoordinatorEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} (session {})", self.host, self.port, self.session_id)
    }
}

/// Ready-made combine operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    /// Element-wise sum across nodes.
    Sum,
    /// Element-wise product across nodes.
    Prod,
    /// Element-wise minimum across nodes.
    Min,
    /// Element-wise maximum across nodes.
    Max,
}

impl ReduceOp {
    /// Combine two elements.
    #[inline]
    pub fn apply<T: Reducible>(self, a: T, b: T) -> T {
        T::reduce(a, b, self)
    }

    /// The operator as a closure, for `all_reduce` call sites.
    pub fn combiner<T: Reducible>(self) -> impl Fn(T, T) -> T + Copy {
        move |a, b| T::reduce(a, b, self)
    }
}

impl std::fmt::Display for ReduceOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReduceOp::Sum => f.write_str("sum"),
            ReduceOp::Prod => f.write_str("prod"),
            ReduceOp::Min => f.write_str("min"),
            ReduceOp::Max => f.write_str("max"),
        }
    }
}

/// Element types `ReduceOp` knows how to combine.
pub trait Reducible: bytemuck::Pod + Send {
    fn reduce(a: Self, b: Self, op: ReduceOp) -> Self;
}

macro_rules! impl_reducible {
    (int: $($ty:ty),*) => {
        $(
            impl Reducible for $ty {
                #[inline]
                fn reduce(a: Self, b: Self, op: ReduceOp) -> Self {
                    match op {
                        ReduceOp::Sum => a.wrapping_add(b),
                        ReduceOp::Prod => a.wrapping_mul(b),
                        ReduceOp::Min => a.min(b),
                        ReduceOp::Max => a.max(b),
                    }
                }
            }
        )*
    };
    (float: $($ty:ty),*) => {
        $(
            impl Reducible for $ty {
                #[inline]
                fn reduce(a: Self, b: Self, op: ReduceOp) -> Self {
                    match op {
                        ReduceOp::Sum => a + b,
                        ReduceOp::Prod => a * b,
                        ReduceOp::Min => a.min(b),
                        ReduceOp::Max => a.max(b),
                    }
                }
            }
        )*
    };
}

impl_reducible!(int: i8, i16, i32, i64, u8, u16, u32, u64);
impl_reducible!(float: f32, f64);
