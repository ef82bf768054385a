//! Per-output frame selection policies.
//!
//! Every policy answers one question per frame: forward or drop. State lives
//! inside the variant and is owned by the ingest loop, so no locking is needed.

use std::time::{Duration, Instant};

use contracts::PolicyConfig;

/// Stateful forward/drop decision for one output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionPolicy {
    /// Forward iff `seq % n == 0`
    EveryNth { n: u64 },
    /// Burst of `n` forwards on a trigger, then `n` drops
    Stride { n: u64, armed: bool, count: u64 },
    /// Burst of `block_size` forwards on a trigger
    Block {
        n: u64,
        block_size: u64,
        armed: bool,
        count: u64,
    },
    /// At most one forward per `interval`
    Throttle {
        interval: Duration,
        cooldown_until: Option<Instant>,
    },
}

impl SelectionPolicy {
    /// Every-Nth decimation. `n == 0` is treated as 1.
    pub fn every_nth(n: u64) -> Self {
        Self::EveryNth { n: n.max(1) }
    }

    /// Stride bursting. `n == 0` is treated as 1.
    pub fn stride(n: u64) -> Self {
        Self::Stride {
            n: n.max(1),
            armed: false,
            count: 0,
        }
    }

    /// Block bursting. Zero parameters are treated as 1.
    pub fn block(n: u64, block_size: u64) -> Self {
        Self::Block {
            n: n.max(1),
            block_size: block_size.max(1),
            armed: false,
            count: 0,
        }
    }

    /// Time throttling
    pub fn throttle(interval: Duration) -> Self {
        Self::Throttle {
            interval,
            cooldown_until: None,
        }
    }

    /// Build fresh policy state from configuration
    ///
    /// `block_size` is the global burst length used by the block variant.
    pub fn from_config(config: &PolicyConfig, block_size: u64) -> Self {
        match *config {
            PolicyConfig::EveryNth { n } => Self::every_nth(n),
            PolicyConfig::Stride { n } => Self::stride(n),
            PolicyConfig::Block { n } => Self::block(n, block_size),
            PolicyConfig::Throttle { seconds } => Self::throttle(Duration::from_secs(seconds)),
        }
    }

    /// Policy kind name (for logs and metrics)
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EveryNth { .. } => "every_nth",
            Self::Stride { .. } => "stride",
            Self::Block { .. } => "block",
            Self::Throttle { .. } => "throttle",
        }
    }

    /// Decide whether frame `seq`, arriving at `now`, is forwarded
    #[inline]
    pub fn decide(&mut self, seq: u64, now: Instant) -> bool {
        match self {
            Self::EveryNth { n } => seq % *n == 0,

            Self::Stride { n, armed, count } => {
                if !*armed {
                    if seq % *n != 0 {
                        return false;
                    }
                    *armed = true;
                    *count = 1;
                    return true;
                }
                *count += 1;
                let forward = *count <= *n;
                if *count >= n.saturating_mul(2) {
                    *armed = false;
                }
                forward
            }

            Self::Block {
                n,
                block_size,
                armed,
                count,
            } => {
                if !*armed {
                    if seq % *n != 0 {
                        return false;
                    }
                    *count = 1;
                    *armed = *block_size > 1;
                    return true;
                }
                *count += 1;
                if *count >= *block_size {
                    *armed = false;
                }
                true
            }

            Self::Throttle {
                interval,
                cooldown_until,
            } => {
                let open = match *cooldown_until {
                    None => true,
                    Some(until) => now >= until,
                };
                if open {
                    *cooldown_until = Some(now.checked_add(*interval).unwrap_or(now));
                }
                open
            }
        }
    }
}
