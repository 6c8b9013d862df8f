pub type Result<T> = std::result::Result<T, SpanError>;

#[derive(Debug, thiserror::Error)]
pub enum SpanError {
    #[error("connection to {peer} failed: {reason}")]
    ConnectionFailed { peer: String, reason: String },

    #[error("node {node} already registered under session {session_id}")]
    DuplicateRegistration { session_id: u64, node: u64 },

    #[error("malformed handshake response: {0}")]
    MalformedHandshake(String),

    #[error("{step} with {peer} failed: {source}")]
    Transport {
        step: &'static str,
        peer: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{operation}: {peer} closed the connection at byte {position} of {expected}")]
    PeerClosed {
        operation: &'static str,
        peer: String,
        position: usize,
        expected: usize,
    },

    #[error("no free port at or above {base}")]
    PortRangeExhausted { base: u16 },

    #[error("invalid node {node}: total is {total}")]
    InvalidNode { node: u64, total: u64 },

    #[error("buffer length mismatch: expected {expected} elements, got {actual}")]
    BufferLengthMismatch { expected: usize, actual: usize },

    #[error("element type mismatch: expected {expected}, got {actual}")]
    ElementMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("node {node} reached the combine step without a registered buffer")]
    UnregisteredBuffer { node: u64 },

    #[error("internal lock poisoned: {0}")]
    LockPoisoned(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpanError {
    /// Wrap a failed socket call, naming the step and the peer it talked to.
    pub fn transport(step: &'static str, peer: impl ToString, source: std::io::Error) -> Self {
        Self::Transport {
            step,
            peer: peer.to_string(),
            source,
        }
    }

    /// True when the error came from a peer vanishing mid-transfer.
    pub fn is_peer_closed(&self) -> bool {
        matches!(self, Self::PeerClosed { .. })
    }
}
