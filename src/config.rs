//! Stack configuration types.
//!
//! [`FragConfig`] sizes every fixed resource of a [`Stack`](crate::stack::Stack):
//! the packet buffer, the fragment buffer pool, the reassembly table and the
//! message queues. All fields have defaults matching a small constrained
//! node, so a configuration file only needs to name what it changes:
//!
//! ```
//! use sixlowpan_frag::config::FragConfig;
//!
//! let config: FragConfig = serde_json::from_str(r#"{ "fbuf_slots": 2 }"#).expect("valid");
//! assert_eq!(config.fbuf_slots, 2);
//! assert_eq!(config.reassembly.capacity, 4);
//! config.validate().expect("defaults are valid");
//! ```

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::{frag::header::MAX_DATAGRAM_SIZE, pktbuf::DEFAULT_PKTBUF_SIZE};

/// Default number of reassembly entries.
pub const DEFAULT_RBUF_SIZE: usize = 4;
/// Default age after which an incomplete reassembly is evicted.
pub const DEFAULT_RBUF_TIMEOUT: Duration = Duration::from_secs(3);
/// Default number of received-range records per reassembly entry.
///
/// Covers a 1280-byte datagram split into 64-byte frames (56 payload bytes
/// each) in any arrival order.
pub const DEFAULT_INTERVALS_PER_ENTRY: usize = 1280_usize.div_ceil(56);
/// Default capacity of the stack's internal message queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 8;
/// Default capacity of the runtime request channel.
pub const DEFAULT_REQUEST_CAPACITY: usize = 16;
/// Default period of the reassembly garbage collection sweep.
pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(1);

/// How a fragment that partially overlaps received data is treated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Discard the reassembly in progress and restart it with the new
    /// fragment (RFC 4944, section 5.3).
    #[default]
    Restart,
    /// Copy the new bytes over the old ones; only bytes not covered before
    /// count towards completion.
    Overwrite,
}

/// Reassembly buffer limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReassemblyConfig {
    /// Maximum number of datagrams reassembled concurrently.
    pub capacity: usize,
    /// Age after which an incomplete reassembly is evicted.
    #[serde(rename = "timeout_ms", with = "millis")]
    pub timeout: Duration,
    /// Received-range records shared by all entries.
    pub interval_pool: usize,
    /// Evict the least recently updated entry when the table is full, even
    /// if it has not timed out yet.
    pub aggressive_override: bool,
    /// Treatment of partially overlapping fragments.
    pub overlap: OverlapPolicy,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_RBUF_SIZE,
            timeout: DEFAULT_RBUF_TIMEOUT,
            interval_pool: DEFAULT_RBUF_SIZE * DEFAULT_INTERVALS_PER_ENTRY,
            aggressive_override: true,
            overlap: OverlapPolicy::Restart,
        }
    }
}

impl ReassemblyConfig {
    /// Set the number of reassembly entries, scaling the interval pool with it.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self.interval_pool = capacity.saturating_mul(DEFAULT_INTERVALS_PER_ENTRY);
        self
    }

    /// Set the eviction timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the size of the shared interval pool.
    #[must_use]
    pub fn with_interval_pool(mut self, interval_pool: usize) -> Self {
        self.interval_pool = interval_pool;
        self
    }

    /// Choose whether a full table evicts its oldest entry.
    #[must_use]
    pub fn with_aggressive_override(mut self, aggressive_override: bool) -> Self {
        self.aggressive_override = aggressive_override;
        self
    }

    /// Set the overlap policy.
    #[must_use]
    pub fn with_overlap(mut self, overlap: OverlapPolicy) -> Self {
        self.overlap = overlap;
        self
    }

    /// Check the limits for consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for a zero capacity, timeout or interval pool,
    /// or a pool smaller than the number of entries.
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero("reassembly.capacity", self.capacity)?;
        if self.timeout.is_zero() {
            return Err(ConfigError::Zero {
                field: "reassembly.timeout_ms",
            });
        }
        if self.interval_pool < self.capacity {
            return Err(ConfigError::IntervalPoolTooSmall {
                pool: self.interval_pool,
                capacity: self.capacity,
            });
        }
        Ok(())
    }
}

/// Configuration of a fragmentation stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FragConfig {
    /// Packet buffer budget in bytes.
    pub pktbuf_size: usize,
    /// Number of datagrams that may be fragmented concurrently.
    pub fbuf_slots: usize,
    /// Tag given to the first outgoing datagram.
    pub initial_tag: u16,
    /// Capacity of the internal message queue used to pace fragments.
    pub queue_capacity: usize,
    /// Capacity of the runtime request channel.
    pub request_capacity: usize,
    /// Period of the reassembly garbage collection sweep.
    #[serde(rename = "gc_interval_ms", with = "millis")]
    pub gc_interval: Duration,
    /// Reassembly buffer limits.
    pub reassembly: ReassemblyConfig,
}

impl Default for FragConfig {
    fn default() -> Self {
        Self {
            pktbuf_size: DEFAULT_PKTBUF_SIZE,
            fbuf_slots: crate::frag::fbuf::DEFAULT_FBUF_SLOTS,
            initial_tag: 0,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            request_capacity: DEFAULT_REQUEST_CAPACITY,
            gc_interval: DEFAULT_GC_INTERVAL,
            reassembly: ReassemblyConfig::default(),
        }
    }
}

impl FragConfig {
    /// Set the packet buffer budget.
    #[must_use]
    pub fn with_pktbuf_size(mut self, pktbuf_size: usize) -> Self {
        self.pktbuf_size = pktbuf_size;
        self
    }

    /// Set the number of fragment buffer slots.
    #[must_use]
    pub fn with_fbuf_slots(mut self, fbuf_slots: usize) -> Self {
        self.fbuf_slots = fbuf_slots;
        self
    }

    /// Set the tag of the first outgoing datagram.
    #[must_use]
    pub fn with_initial_tag(mut self, initial_tag: u16) -> Self {
        self.initial_tag = initial_tag;
        self
    }

    /// Set the internal message queue capacity.
    #[must_use]
    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Set the runtime request channel capacity.
    #[must_use]
    pub fn with_request_capacity(mut self, request_capacity: usize) -> Self {
        self.request_capacity = request_capacity;
        self
    }

    /// Set the garbage collection period.
    #[must_use]
    pub fn with_gc_interval(mut self, gc_interval: Duration) -> Self {
        self.gc_interval = gc_interval;
        self
    }

    /// Replace the reassembly limits.
    #[must_use]
    pub fn with_reassembly(mut self, reassembly: ReassemblyConfig) -> Self {
        self.reassembly = reassembly;
        self
    }

    /// Check the configuration for consistency.
    ///
    /// A packet buffer too small for one maximum-size datagram is accepted
    /// but logged, since small test stacks use one deliberately.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a size or period is zero or the
    /// reassembly limits are inconsistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero("pktbuf_size", self.pktbuf_size)?;
        non_zero("fbuf_slots", self.fbuf_slots)?;
        non_zero("queue_capacity", self.queue_capacity)?;
        non_zero("request_capacity", self.request_capacity)?;
        if self.gc_interval.is_zero() {
            return Err(ConfigError::Zero {
                field: "gc_interval_ms",
            });
        }
        self.reassembly.validate()?;
        if self.pktbuf_size < usize::from(MAX_DATAGRAM_SIZE) {
            log::warn!(
                "packet buffer of {} bytes cannot hold a {}-byte datagram",
                self.pktbuf_size,
                MAX_DATAGRAM_SIZE
            );
        }
        Ok(())
    }
}

/// Errors reported by [`FragConfig::validate`].
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A size or period that must be positive is zero.
    #[error("{field} must be greater than zero")]
    Zero {
        /// Name of the offending field.
        field: &'static str,
    },
    /// The interval pool cannot give every entry one record.
    #[error("interval pool of {pool} cannot serve {capacity} reassembly entries")]
    IntervalPoolTooSmall {
        /// Configured pool size.
        pool: usize,
        /// Configured number of entries.
        capacity: usize,
    },
}

fn non_zero(field: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Zero { field });
    }
    Ok(())
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn defaults_match_constrained_node() {
        let config = FragConfig::default();
        assert_eq!(config.pktbuf_size, 6144);
        assert_eq!(config.fbuf_slots, 1);
        assert_eq!(config.reassembly.capacity, 4);
        assert_eq!(config.reassembly.timeout, Duration::from_secs(3));
        assert_eq!(config.reassembly.interval_pool, 4 * 23);
        assert!(config.reassembly.aggressive_override);
        assert_eq!(config.reassembly.overlap, OverlapPolicy::Restart);
        assert_eq!(config.validate(), Ok(()));
    }

    #[rstest]
    #[case(FragConfig::default().with_fbuf_slots(0), "fbuf_slots")]
    #[case(FragConfig::default().with_queue_capacity(0), "queue_capacity")]
    #[case(FragConfig::default().with_gc_interval(Duration::ZERO), "gc_interval_ms")]
    #[case(
        FragConfig::default().with_reassembly(ReassemblyConfig::default().with_capacity(0)),
        "reassembly.capacity"
    )]
    fn zero_fields_are_rejected(#[case] config: FragConfig, #[case] field: &'static str) {
        assert_eq!(config.validate(), Err(ConfigError::Zero { field }));
    }

    #[test]
    fn interval_pool_must_cover_every_entry() {
        let reassembly = ReassemblyConfig::default().with_interval_pool(2);
        assert_eq!(
            reassembly.validate(),
            Err(ConfigError::IntervalPoolTooSmall {
                pool: 2,
                capacity: 4,
            })
        );
    }

    #[test]
    fn deserialises_partial_documents() {
        let config: FragConfig = serde_json::from_str(
            r#"{
                "initial_tag": 26894,
                "gc_interval_ms": 250,
                "reassembly": { "timeout_ms": 60000, "overlap": "overwrite" }
            }"#,
        )
        .expect("valid configuration");

        assert_eq!(config.initial_tag, 0x690e);
        assert_eq!(config.gc_interval, Duration::from_millis(250));
        assert_eq!(config.reassembly.timeout, Duration::from_secs(60));
        assert_eq!(config.reassembly.overlap, OverlapPolicy::Overwrite);
        assert_eq!(config.reassembly.capacity, DEFAULT_RBUF_SIZE);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result = serde_json::from_str::<FragConfig>(r#"{ "mtu": 1280 }"#);
        assert!(result.is_err());
    }
}
