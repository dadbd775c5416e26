//! Connection engine limits and timeouts.
//!
//! Defaults match the deployments this server grew up in: small control
//! messages, fast admin tooling and agents that may sit on a request for a
//! while before answering.

use std::time::Duration;

/// Fixed sizes and deadlines applied to every peer.
///
/// # Memory
///
/// Each connection holds exactly one receive buffer of `buffer_capacity`
/// bytes for its whole lifetime; `buffer_capacity` is therefore also the
/// hard ceiling on the total size (headers plus body) of any single
/// message.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Receive buffer capacity per peer, and the maximum message size
    /// (default: `8 KiB`).
    pub buffer_capacity: usize,

    /// Idle deadline for REST clients while a message is in flight
    /// (default: `10 seconds`).
    ///
    /// Rearmed by every completed read. A transient client that stalls
    /// mid-message is force-closed when it fires.
    pub rest_timeout: Duration,

    /// Idle deadline for agents while a message is in flight
    /// (default: `30 seconds`).
    ///
    /// Agent operations can take a while to stream their result back, so
    /// the clock is slower than the REST one. Agents parked in keepalive
    /// between messages are not subject to it at all.
    pub agent_timeout: Duration,

    /// Maximum duration of a single write toward a peer (default: `3 seconds`).
    pub write_timeout: Duration,

    /// Number of entries in the keepalive slot table (default: `32`).
    pub keepalive_slots: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            buffer_capacity: 8 * 1024,
            rest_timeout: Duration::from_secs(10),
            agent_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(3),
            keepalive_slots: 32,

            _priv: (),
        }
    }
}
