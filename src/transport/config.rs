//! Transport configuration.
//!
//! Frame sizing, flow-control watermarks, and the two knobs that differ
//! between peers: the transient-send retry delay and whether the final body
//! pull is acknowledged.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PeerFetchError, Result};
use crate::protocol::{
    default_user_agent, BUFFERED_AMOUNT_LOW_THRESHOLD, DATA_CHANNEL_MTU, MAX_BUFFERED_AMOUNT,
};

/// Data-channel transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Largest binary frame payload in bytes.
    pub mtu: usize,

    /// Sending pauses while the channel buffers more than this many bytes.
    pub low_watermark: usize,

    /// Buffer sizing cap. Informational; not enforced.
    pub high_watermark: usize,

    /// Delay before the single retry of a send on a not-yet-open channel.
    pub retry_delay_ms: u64,

    /// Send an empty text frame back after the final body pull.
    pub ack_eof: bool,

    /// `User-Agent` injected into requests that carry none.
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mtu: DATA_CHANNEL_MTU,
            low_watermark: BUFFERED_AMOUNT_LOW_THRESHOLD,
            high_watermark: MAX_BUFFERED_AMOUNT,
            retry_delay_ms: 500,
            ack_eof: true,
            user_agent: default_user_agent(),
        }
    }
}

impl TransportConfig {
    /// Set the frame size, scaling both watermarks with it.
    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self.low_watermark = mtu;
        self.high_watermark = mtu.saturating_mul(8);
        self
    }

    /// Set the transient-send retry delay.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Enable or disable the end-of-body acknowledgement.
    pub fn with_ack_eof(mut self, ack_eof: bool) -> Self {
        self.ack_eof = ack_eof;
        self
    }

    /// Set the default `User-Agent`.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Retry delay as a `Duration`.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Reject settings the pump cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.mtu == 0 {
            return Err(PeerFetchError::Config("mtu must be greater than 0".into()));
        }
        if self.low_watermark >= self.high_watermark {
            return Err(PeerFetchError::Config(format!(
                "low_watermark ({}) must be below high_watermark ({})",
                self.low_watermark, self.high_watermark
            )));
        }
        Ok(())
    }
}
