//! Opportunistic maintenance: lease eviction and log pruning.

use chatrelay_api::*;
use std::sync::{Mutex, TryLockError};

use crate::log::AppendLog;
use crate::presence::PresenceTable;

/// What a sweep did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Nicknames whose lease expired. One "left (timeout)" record was
    /// appended for each, in this order.
    pub evicted: Vec<String>,

    /// Count of records pruned from the log.
    pub pruned: usize,
}

/// Runs maintenance at most once at a time.
///
/// Any request may try to sweep. If another sweep is already running,
/// the attempt returns immediately rather than waiting: it only matters
/// that some request sweeps while traffic continues.
pub struct Sweeper {
    lock: Mutex<()>,
    presence_timeout: std::time::Duration,
    relay_window: std::time::Duration,
}

impl Sweeper {
    /// Construct a new sweeper.
    pub fn new(
        presence_timeout: std::time::Duration,
        relay_window: std::time::Duration,
    ) -> Self {
        Self {
            lock: Mutex::new(()),
            presence_timeout,
            relay_window,
        }
    }

    /// Evict expired leases (announcing each) then prune the log.
    /// Returns `None` if another sweep holds the lock.
    pub fn sweep(
        &self,
        log: &AppendLog,
        presence: &PresenceTable,
        now: Timestamp,
    ) -> Option<SweepReport> {
        let _guard = match self.lock.try_lock() {
            Ok(g) => g,
            Err(TryLockError::Poisoned(p)) => p.into_inner(),
            Err(TryLockError::WouldBlock) => {
                tracing::trace!("sweep already in progress, skipping");
                return None;
            }
        };

        let evicted = presence.evict_older_than(self.presence_timeout, now);

        if !evicted.is_empty() {
            tracing::debug!(?evicted, "presence leases expired");
            log.append_all(
                evicted.iter().map(|n| NewRecord::left_timeout(n)).collect(),
                now,
            );
        }

        // prune after announcing, the fresh leave records are never pruned
        let pruned = log.prune_older_than(self.relay_window, now);

        if pruned > 0 {
            tracing::debug!(pruned, "pruned records past the relay window");
        }

        Some(SweepReport { evicted, pruned })
    }
}
