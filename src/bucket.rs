//! Pure token-bucket math shared by every [`crate::store::TokenBucketStore`]
//! implementation.
//!
//! Operates entirely in integer microseconds to keep the distributed
//! (Redis, via `cjson`) and local implementations bit-for-bit consistent —
//! floating point drift between a Lua VM and the host process is exactly
//! the kind of distributed inconsistency this module exists to avoid.

use serde::{Deserialize, Serialize};

use crate::domain::band::RateLimitBand;

/// The persisted record for one bucket: current token count and the
/// microsecond timestamp it was last refilled to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketRecord {
    pub tokens: u64,
    pub last_refill_micros: u64,
}

impl BucketRecord {
    pub fn full(capacity: u64, now_micros: u64) -> Self {
        Self {
            tokens: capacity,
            last_refill_micros: now_micros,
        }
    }
}

/// Result of one atomic consume attempt, mirroring the wire-level
/// `{success, tokens, waitNanos}` triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketState {
    pub consumed: bool,
    pub remaining_tokens: u64,
    pub nanos_to_wait_for_refill: u64,
}

/// Runs the five-step refill-then-consume algorithm against `record`
/// (or a freshly seeded full bucket if `record` is `None`), returning the
/// updated record to persist and the resulting [`BucketState`].
///
/// `now_micros` must come from a single authoritative clock — the store
/// server's time, or (for the local store) the process clock — never a
/// caller-supplied value, to avoid skew across nodes.
pub fn try_consume(
    record: Option<BucketRecord>,
    band: &RateLimitBand,
    permits: u64,
    now_micros: u64,
) -> (BucketRecord, BucketState) {
    let capacity = band.capacity;
    let window_micros = (band.window.as_micros() as u64).max(1);

    let mut record = record.unwrap_or_else(|| BucketRecord::full(capacity, now_micros));

    let elapsed = now_micros.saturating_sub(record.last_refill_micros);
    if elapsed > 0 {
        // refilled = elapsed * capacity / window, floor-rounded.
        let refilled = (elapsed as u128 * capacity as u128) / window_micros as u128;
        if refilled > 0 {
            record.tokens = (record.tokens + refilled as u64).min(capacity);
            // Advance last_refill only by the whole tokens actually
            // refilled, preserving unspent fractional elapsed time.
            let consumed_micros = (refilled * window_micros as u128) / capacity as u128;
            record.last_refill_micros += consumed_micros as u64;
        }
    }

    if record.tokens >= permits {
        record.tokens -= permits;
        (
            record,
            BucketState {
                consumed: true,
                remaining_tokens: record.tokens,
                nanos_to_wait_for_refill: 0,
            },
        )
    } else {
        let deficit = permits - record.tokens;
        let wait_micros = ((deficit as u128 * window_micros as u128) + capacity as u128 - 1)
            / capacity as u128;
        (
            record,
            BucketState {
                consumed: false,
                remaining_tokens: record.tokens,
                nanos_to_wait_for_refill: (wait_micros as u64).saturating_mul(1000),
            },
        )
    }
}
