//! Record identity.
//!
//! A [RecordId] is an exact decimal number of seconds since the unix epoch,
//! carrying 10 fractional digits:
//!
//! ```text
//! 1700000000.1234 567 042
//!            ^^^^ ^^^ ^^^
//!            |    |   process identifier (pid % 1000)
//!            |    per-process sequence within one tick
//!            0.1ms time tick
//! ```
//!
//! Because the leading digits are a timestamp, an id doubles as a
//! resumption cursor: a client that has consumed everything up to id `X`
//! asks for records `> X`, and a fresh client can synthesize a cursor
//! from its own clock. Comparison is always exact, never via `f64`.

use crate::*;
use std::sync::Mutex;

const FRAC_DIGITS: usize = 10;
const FRAC_SCALE: u64 = 10_000_000_000;
const TICKS_PER_SEC: u64 = 10_000;
const MICROS_PER_TICK: u64 = 100;
const TICK_TO_FRAC: u64 = 1_000_000;
const FRAC_PER_MICRO: u64 = 10_000;
const SEQ_MAX: u64 = 999;
const NODE_MOD: u64 = 1_000;

/// A globally comparable, monotonically generated record identity.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId {
    secs: u64,
    frac: u64,
}

impl RecordId {
    /// The zero id. Every generated id is greater than this.
    pub const ZERO: RecordId = RecordId { secs: 0, frac: 0 };

    /// Cursor at exactly the given instant. Records generated at or after
    /// `ts` compare greater than or equal to this.
    pub fn from_timestamp(ts: Timestamp) -> Self {
        let micros = ts.as_micros();
        if micros <= 0 {
            return Self::ZERO;
        }
        let micros = micros as u64;
        Self {
            secs: micros / 1_000_000,
            frac: (micros % 1_000_000) * FRAC_PER_MICRO,
        }
    }

    /// The instant this id was generated at (microsecond precision).
    pub fn as_timestamp(&self) -> Timestamp {
        let micros = self
            .secs
            .saturating_mul(1_000_000)
            .saturating_add(self.frac / FRAC_PER_MICRO);
        Timestamp::from_micros(i64::try_from(micros).unwrap_or(i64::MAX))
    }

    /// True for [RecordId::ZERO].
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl std::fmt::Debug for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RecordId({self})")
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:0width$}", self.secs, self.frac, width = FRAC_DIGITS)
    }
}

impl std::str::FromStr for RecordId {
    type Err = RelayError;

    /// Parse any non-negative decimal. Fractional digits past the tenth
    /// are truncated.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (int, frac) = s.split_once('.').unwrap_or((s, ""));

        if int.is_empty() && frac.is_empty() {
            return Err(RelayError::other(format!("InvalidRecordId: {s:?}")));
        }

        let all_digits = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
        if !all_digits(int) || !all_digits(frac) {
            return Err(RelayError::other(format!("InvalidRecordId: {s:?}")));
        }

        let secs = if int.is_empty() {
            0
        } else {
            int.parse::<u64>().map_err(|e| {
                RelayError::other_src(format!("InvalidRecordId: {s:?}"), e)
            })?
        };

        let mut out = 0_u64;
        let mut digits = frac.bytes();
        for _ in 0..FRAC_DIGITS {
            let d = digits.next().map(|b| (b - b'0') as u64).unwrap_or(0);
            out = out * 10 + d;
        }

        Ok(Self { secs, frac: out })
    }
}

impl serde::Serialize for RecordId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for RecordId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = RecordId;

            fn expecting(
                &self,
                f: &mut std::fmt::Formatter<'_>,
            ) -> std::fmt::Result {
                f.write_str("a non-negative decimal string or number")
            }

            fn visit_str<E: serde::de::Error>(
                self,
                v: &str,
            ) -> Result<Self::Value, E> {
                v.parse().map_err(E::custom)
            }

            fn visit_u64<E: serde::de::Error>(
                self,
                v: u64,
            ) -> Result<Self::Value, E> {
                Ok(RecordId { secs: v, frac: 0 })
            }

            fn visit_i64<E: serde::de::Error>(
                self,
                v: i64,
            ) -> Result<Self::Value, E> {
                u64::try_from(v)
                    .map(|secs| RecordId { secs, frac: 0 })
                    .map_err(E::custom)
            }

            fn visit_f64<E: serde::de::Error>(
                self,
                v: f64,
            ) -> Result<Self::Value, E> {
                if !v.is_finite() || v < 0.0 {
                    return Err(E::custom("InvalidRecordId"));
                }
                format!("{v:.10}").parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(V)
    }
}

/// Generates strictly increasing [RecordId]s without a central counter.
///
/// Within one generator, ids never repeat and never go backwards, even if
/// the wall clock does. Across processes, ids generated in the same tick
/// differ by their process identifier digits.
#[derive(Debug)]
pub struct IdGenerator {
    node: u64,
    // (last tick, last sequence)
    last: Mutex<(u64, u64)>,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::for_process()
    }
}

impl IdGenerator {
    /// Construct a generator with an explicit process identifier.
    /// Only the last three decimal digits are used.
    pub fn new(node: u32) -> Self {
        Self {
            node: node as u64 % NODE_MOD,
            last: Mutex::new((0, 0)),
        }
    }

    /// Construct a generator identified by the current process id.
    pub fn for_process() -> Self {
        Self::new(std::process::id())
    }

    /// Generate the next id using the system clock.
    pub fn next(&self) -> RecordId {
        self.next_at(Timestamp::now())
    }

    /// Generate the next id as of `now`.
    pub fn next_at(&self, now: Timestamp) -> RecordId {
        let tick = now.as_micros().max(0) as u64 / MICROS_PER_TICK;

        let mut last = self
            .last
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let (mut cur, mut seq) = *last;
        if tick > cur {
            cur = tick;
            seq = 0;
        } else {
            seq += 1;
            if seq > SEQ_MAX {
                // borrow the next tick rather than repeat
                cur += 1;
                seq = 0;
            }
        }
        *last = (cur, seq);

        let frac =
            (cur % TICKS_PER_SEC) * TICK_TO_FRAC + seq * NODE_MOD + self.node;
        debug_assert!(frac < FRAC_SCALE);

        RecordId {
            secs: cur / TICKS_PER_SEC,
            frac,
        }
    }
}
