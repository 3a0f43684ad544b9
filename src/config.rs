//! Runtime configuration for a [`crate::server::Server`].
//!
//! Knobs that a C equivalent of this core would fix at compile time —
//! growth factor, scratch-buffer size, listen backlog — are exposed
//! here as runtime fields instead, deserializable from TOML the way
//! larger embedders typically load their network-stack settings.

use serde::{Deserialize, Serialize};

use crate::buffer::DEFAULT_GROWTH_FACTOR;

/// Configuration accepted by [`crate::server::Server::new`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Geometric growth multiplier applied when a `ByteBuffer` must
    /// grow to satisfy an `append`.
    pub growth_factor: f64,

    /// Listen backlog passed to the OS when a listener is opened.
    pub listen_backlog: i32,

    /// Size of the stack scratch buffer used for each `recv` call.
    /// Defaults to 2048 bytes.
    pub recv_scratch_size: usize,

    /// Redirect every connection's send/receive buffer allocations
    /// through a caller-supplied allocator instead of the `std` global
    /// allocator. Not (de)serializable — set it after loading the rest
    /// of `Config` from a file, if at all.
    #[cfg(feature = "allocator-hook")]
    #[serde(skip)]
    pub allocator: Option<std::sync::Arc<dyn crate::buffer::ByteAllocator>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            growth_factor: DEFAULT_GROWTH_FACTOR,
            listen_backlog: crate::addr::DEFAULT_BACKLOG,
            recv_scratch_size: 2048,
            #[cfg(feature = "allocator-hook")]
            allocator: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.growth_factor, 2.0);
        assert_eq!(cfg.recv_scratch_size, 2048);
    }

    #[test]
    fn roundtrips_through_toml() {
        let cfg = Config::default();
        let encoded = toml::to_string(&cfg).unwrap();
        let decoded: Config = toml::from_str(&encoded).unwrap();
        assert_eq!(decoded.growth_factor, cfg.growth_factor);
    }
}
