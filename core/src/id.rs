//! Unique id generation.
//!
//! The catalog consumes ids through [`IdGenerator`] and treats the generator
//! as a black box: ids are unique, increase with time, and generation may
//! fail. A failure is a non-retryable internal error for the request that
//! asked for the id.
//!
//! [`SnowflakeIdGenerator`] is the process-local implementation: a 63-bit id
//! made of a millisecond timestamp, a node id and a per-millisecond sequence.
//!
//! ```text
//!  63        22         12          0
//!  ┌─────────┬──────────┬───────────┐
//!  │ 41 bits │ 10 bits  │ 12 bits   │
//!  │ millis  │ node id  │ sequence  │
//!  └─────────┴──────────┴───────────┘
//! ```

use crate::environment::Clock;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use thiserror::Error;

const NODE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const MAX_NODE_ID: u16 = (1 << NODE_BITS) - 1;
const MAX_SEQUENCE: u64 = (1 << SEQUENCE_BITS) - 1;
const MAX_TIMESTAMP: u64 = (1 << 41) - 1;

/// Custom epoch: 2024-01-01T00:00:00Z in Unix milliseconds.
pub const SNOWFLAKE_EPOCH_MS: i64 = 1_704_067_200_000;

/// Errors from id generation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The clock reported a time earlier than the last issued id.
    #[error("Clock moved backwards by {drift_ms}ms")]
    ClockMovedBackwards {
        /// How far back the clock went
        drift_ms: u64,
    },

    /// All sequence numbers for the current millisecond are used.
    #[error("Sequence exhausted for millisecond {timestamp_ms}")]
    SequenceExhausted {
        /// Millisecond (relative to the epoch) that ran out
        timestamp_ms: u64,
    },

    /// The clock is before the epoch or past the 41-bit range.
    #[error("Timestamp outside the id range: {0}")]
    OutOfRange(DateTime<Utc>),

    /// Node id does not fit in 10 bits.
    #[error("Invalid node id {0} (max 1023)")]
    InvalidNodeId(u16),

    /// Generator state lock was poisoned by a panicking thread.
    #[error("Id generator state poisoned")]
    Poisoned,
}

/// Source of unique, time-ordered 64-bit ids.
pub trait IdGenerator: Send + Sync {
    /// Produce the next id.
    ///
    /// # Errors
    ///
    /// Returns [`IdError`] if the generator cannot produce a value.
    fn next_id(&self) -> Result<u64, IdError>;
}

#[derive(Debug, Default)]
struct SnowflakeState {
    last_ms: u64,
    sequence: u64,
}

/// Snowflake-style generator for a single node.
pub struct SnowflakeIdGenerator {
    node_id: u16,
    clock: Arc<dyn Clock>,
    state: Mutex<SnowflakeState>,
}

impl SnowflakeIdGenerator {
    /// Create a generator for `node_id` reading time from `clock`.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::InvalidNodeId`] if `node_id` exceeds 10 bits.
    pub fn new(node_id: u16, clock: Arc<dyn Clock>) -> Result<Self, IdError> {
        if node_id > MAX_NODE_ID {
            return Err(IdError::InvalidNodeId(node_id));
        }
        Ok(Self {
            node_id,
            clock,
            state: Mutex::new(SnowflakeState::default()),
        })
    }

    fn elapsed_ms(&self) -> Result<u64, IdError> {
        let now = self.clock.now();
        let elapsed = now.timestamp_millis() - SNOWFLAKE_EPOCH_MS;
        u64::try_from(elapsed)
            .ok()
            .filter(|ms| *ms <= MAX_TIMESTAMP)
            .ok_or(IdError::OutOfRange(now))
    }
}

impl std::fmt::Debug for SnowflakeIdGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnowflakeIdGenerator")
            .field("node_id", &self.node_id)
            .finish_non_exhaustive()
    }
}

impl IdGenerator for SnowflakeIdGenerator {
    fn next_id(&self) -> Result<u64, IdError> {
        let now_ms = self.elapsed_ms()?;
        let mut state = self.state.lock().map_err(|_| IdError::Poisoned)?;

        if now_ms < state.last_ms {
            return Err(IdError::ClockMovedBackwards {
                drift_ms: state.last_ms - now_ms,
            });
        }

        if now_ms == state.last_ms {
            if state.sequence >= MAX_SEQUENCE {
                return Err(IdError::SequenceExhausted {
                    timestamp_ms: now_ms,
                });
            }
            state.sequence += 1;
        } else {
            state.last_ms = now_ms;
            state.sequence = 0;
        }

        Ok((now_ms << (NODE_BITS + SEQUENCE_BITS))
            | (u64::from(self.node_id) << SEQUENCE_BITS)
            | state.sequence)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::RwLock;

    struct ManualClock(RwLock<DateTime<Utc>>);

    impl ManualClock {
        fn at(time: DateTime<Utc>) -> Arc<Self> {
            Arc::new(Self(RwLock::new(time)))
        }

        fn set(&self, time: DateTime<Utc>) {
            *self.0.write().unwrap() = time;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.read().unwrap()
        }
    }

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(SNOWFLAKE_EPOCH_MS + ms).unwrap()
    }

    #[test]
    fn ids_increase_within_and_across_milliseconds() {
        let clock = ManualClock::at(t(1_000));
        let ids = SnowflakeIdGenerator::new(3, clock.clone()).unwrap();

        let a = ids.next_id().unwrap();
        let b = ids.next_id().unwrap();
        clock.set(t(1_001));
        let c = ids.next_id().unwrap();

        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn id_layout_carries_node_and_sequence() {
        let ids = SnowflakeIdGenerator::new(5, ManualClock::at(t(2))).unwrap();
        let id = ids.next_id().unwrap();
        assert_eq!(id >> 22, 2);
        assert_eq!((id >> 12) & 0x3ff, 5);
        assert_eq!(id & 0xfff, 0);
    }

    #[test]
    fn clock_regression_is_an_error() {
        let clock = ManualClock::at(t(500));
        let ids = SnowflakeIdGenerator::new(1, clock.clone()).unwrap();
        ids.next_id().unwrap();

        clock.set(t(400));

        assert_eq!(
            ids.next_id(),
            Err(IdError::ClockMovedBackwards { drift_ms: 100 })
        );
    }

    #[test]
    fn sequence_exhaustion_is_an_error() {
        let ids = SnowflakeIdGenerator::new(1, ManualClock::at(t(10))).unwrap();
        for _ in 0..=MAX_SEQUENCE {
            ids.next_id().unwrap();
        }
        assert_eq!(
            ids.next_id(),
            Err(IdError::SequenceExhausted { timestamp_ms: 10 })
        );
    }

    #[test]
    fn rejects_wide_node_ids() {
        let result = SnowflakeIdGenerator::new(1024, ManualClock::at(t(0)));
        assert!(matches!(result, Err(IdError::InvalidNodeId(1024))));
    }

    #[test]
    fn clock_before_epoch_is_out_of_range() {
        let ids = SnowflakeIdGenerator::new(1, ManualClock::at(t(-1))).unwrap();
        assert!(matches!(ids.next_id(), Err(IdError::OutOfRange(_))));
    }
}
