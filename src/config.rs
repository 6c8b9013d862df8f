//! Runtime-configurable tuning parameters for spanreduce.
//!
//! All values have sensible defaults. Override via environment variables
//! (prefixed `SPANREDUCE_`) or by constructing a custom `SpanConfig`.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Tuning parameters for the handshake and the streaming engines.
#[derive(Debug, Clone)]
pub struct SpanConfig {
    /// Maximum bytes moved by one send or receive in the reduce and
    /// broadcast passes.
    pub chunk_size: usize,

    /// First port tried for the children listener. Incremented while the
    /// port is in use.
    pub base_port: u16,

    /// Attempts made to connect to the parent before giving up.
    pub connect_retries: u32,

    /// Pause between parent connect attempts.
    pub connect_retry_delay: Duration,

    /// Address the children listener binds to.
    pub listen_addr: IpAddr,
}

impl Default for SpanConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024, // 64 KiB
            base_port: 26544,
            connect_retries: 100,
            connect_retry_delay: Duration::from_secs(1),
            listen_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }
}

impl SpanConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `SPANREDUCE_CHUNK_BYTES`
    /// - `SPANREDUCE_BASE_PORT`
    /// - `SPANREDUCE_CONNECT_RETRIES`
    /// - `SPANREDUCE_CONNECT_RETRY_MS`
    /// - `SPANREDUCE_LISTEN_ADDR`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(v) = lookup("SPANREDUCE_CHUNK_BYTES") {
            if let Ok(n) = v.parse::<usize>() {
                if n > 0 {
                    cfg.chunk_size = n;
                }
            }
        }
        if let Some(v) = lookup("SPANREDUCE_BASE_PORT") {
            if let Ok(p) = v.parse::<u16>() {
                cfg.base_port = p;
            }
        }
        if let Some(v) = lookup("SPANREDUCE_CONNECT_RETRIES") {
            if let Ok(n) = v.parse::<u32>() {
                cfg.connect_retries = n;
            }
        }
        if let Some(v) = lookup("SPANREDUCE_CONNECT_RETRY_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                cfg.connect_retry_delay = Duration::from_millis(ms);
            }
        }
        if let Some(v) = lookup("SPANREDUCE_LISTEN_ADDR") {
            if let Ok(addr) = v.parse::<IpAddr>() {
                cfg.listen_addr = addr;
            }
        }

        cfg
    }
}
