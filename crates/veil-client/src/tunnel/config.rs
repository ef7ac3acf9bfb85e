//! Tunnel client configuration.

use std::time::Duration;

use veil_core::Config;
use veil_crypto::CipherSuite;

use super::error::TunnelClientError;
use crate::session::SessionOptions;

/// Configuration for the client's connection to the relay.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Relay address (e.g., "127.0.0.1:3001").
    pub relay_addr: String,

    /// Reconnection policy.
    pub reconnect: ReconnectPolicy,

    /// Settings for each fresh session.
    pub session: SessionOptions,
}

/// Exponential backoff reconnection policy.
///
/// Attempts are numbered from 1. Attempt `n` waits `base_delay * 2^(n-1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(3000),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exp)
    }

    /// Whether attempt number `attempt` may be made.
    pub const fn should_retry(&self, attempt: u32) -> bool {
        attempt >= 1 && attempt <= self.max_attempts
    }
}

impl TunnelConfig {
    /// Create a new tunnel config with required fields and defaults.
    pub fn new(relay_addr: String) -> Self {
        Self {
            relay_addr,
            reconnect: ReconnectPolicy::default(),
            session: SessionOptions::default(),
        }
    }

    /// Build from resolved settings.
    pub fn from_config(config: &Config) -> Result<Self, TunnelClientError> {
        let cipher_suite: CipherSuite = config
            .session
            .cipher_suite
            .parse()
            .map_err(|e| TunnelClientError::Config(format!("{e}")))?;
        Ok(Self {
            relay_addr: config.relay.addr.clone(),
            reconnect: ReconnectPolicy {
                base_delay: Duration::from_millis(config.relay.reconnect_base_delay_ms),
                max_attempts: config.relay.max_reconnect_attempts,
            },
            session: SessionOptions {
                cipher_suite,
                self_destruct_after: Duration::from_secs(config.session.self_destruct_secs),
            },
        })
    }
}
