//! The presence lease table.

use chatrelay_api::*;
use std::collections::BTreeMap;
use std::path::Path;

use crate::store::JsonCell;

const USERS_FILE: &str = "chat-users.json";

/// The outcome of a heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Renewal {
    /// The nickname was absent and is now leased.
    Joined,

    /// The lease was renewed.
    Renewed,

    /// Another session holds the nickname, nothing changed.
    HeldByOther,
}

/// Nickname -> lease. A nickname absent from the table is offline.
pub struct PresenceTable {
    cell: JsonCell<BTreeMap<String, PresenceEntry>>,
}

impl PresenceTable {
    /// Open the table, loading `chat-users.json` from `dir` if given.
    pub fn open(dir: Option<&Path>) -> Self {
        Self {
            cell: JsonCell::open("presence", dir, USERS_FILE, BTreeMap::new),
        }
    }

    /// Create or renew the lease named by `beat`.
    ///
    /// Only [Renewal::Joined] announces a join. Renewing an existing lease
    /// keeps any session or location details the new beat omits. A lease
    /// held by one session is never taken over by a beat from another;
    /// the first claim on a nickname wins until it lapses or leaves.
    pub fn upsert(&self, beat: Heartbeat, now: Timestamp) -> Renewal {
        let now = now.as_secs();
        self.cell.update(|map| {
            use std::collections::btree_map::Entry;

            match map.entry(beat.nickname.clone()) {
                Entry::Occupied(mut e) => {
                    let e = e.get_mut();
                    if let (Some(held), Some(claim)) =
                        (&e.session_id, &beat.session_id)
                    {
                        if held != claim {
                            return (Renewal::HeldByOther, false);
                        }
                    }
                    e.last_seen = now;
                    if beat.session_id.is_some() {
                        e.session_id = beat.session_id;
                    }
                    if beat.lat.is_some() {
                        e.lat = beat.lat;
                    }
                    if beat.lon.is_some() {
                        e.lon = beat.lon;
                    }
                    (Renewal::Renewed, true)
                }
                Entry::Vacant(e) => {
                    e.insert(PresenceEntry::from_heartbeat(beat, now));
                    (Renewal::Joined, true)
                }
            }
        })
    }

    /// Renew (or silently create) the lease for `nickname`.
    pub fn touch(&self, nickname: &str, now: Timestamp) {
        let now = now.as_secs();
        self.cell.update(|map| {
            map.entry(nickname.to_string())
                .and_modify(|e| e.last_seen = now)
                .or_insert_with(|| PresenceEntry::bare(nickname, now));
            ((), true)
        })
    }

    /// Remove every lease last renewed more than `max_age` before `now`,
    /// returning the evicted nicknames.
    pub fn evict_older_than(
        &self,
        max_age: std::time::Duration,
        now: Timestamp,
    ) -> Vec<String> {
        let now = now.as_secs();
        let max_age = max_age.as_secs() as i64;

        self.cell.update(|map| {
            let mut evicted = Vec::new();
            map.retain(|nick, e| {
                if now - e.last_seen > max_age {
                    evicted.push(nick.clone());
                    false
                } else {
                    true
                }
            });
            let changed = !evicted.is_empty();
            (evicted, changed)
        })
    }

    /// Drop the lease for `nickname`. Returns `true` if there was one.
    pub fn remove(&self, nickname: &str) -> bool {
        self.cell.update(|map| {
            let removed = map.remove(nickname).is_some();
            (removed, removed)
        })
    }

    /// The nicknames currently present.
    pub fn list(&self) -> Vec<String> {
        self.cell.read(|map| map.keys().cloned().collect())
    }

    /// The full leases currently held.
    pub fn entries(&self) -> Vec<PresenceEntry> {
        self.cell.read(|map| map.values().cloned().collect())
    }

    /// True if `nickname` holds a lease.
    #[cfg(test)]
    pub fn contains(&self, nickname: &str) -> bool {
        self.cell.read(|map| map.contains_key(nickname))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    fn beat(nick: &str, sess: &str) -> Heartbeat {
        Heartbeat {
            nickname: nick.into(),
            session_id: Some(sess.into()),
            lat: None,
            lon: None,
        }
    }

    #[test]
    fn join_detected_exactly_once() {
        let p = PresenceTable::open(None);
        assert_eq!(
            Renewal::Joined,
            p.upsert(beat("neo", "s1"), Timestamp::from_secs(0))
        );
        assert_eq!(
            Renewal::Renewed,
            p.upsert(beat("neo", "s1"), Timestamp::from_secs(10))
        );
        assert_eq!(
            Renewal::Renewed,
            p.upsert(beat("neo", "s1"), Timestamp::from_secs(20))
        );
        assert_eq!(vec!["neo".to_string()], p.list());

        assert!(p.remove("neo"));
        assert!(!p.remove("neo"));
        assert_eq!(
            Renewal::Joined,
            p.upsert(beat("neo", "s1"), Timestamp::from_secs(30))
        );
    }

    #[test]
    fn renew_keeps_details() {
        let p = PresenceTable::open(None);
        p.upsert(
            Heartbeat {
                lat: Some(1.0),
                lon: Some(2.0),
                ..beat("neo", "s1")
            },
            Timestamp::from_secs(0),
        );
        p.upsert(
            Heartbeat {
                nickname: "neo".into(),
                session_id: None,
                lat: None,
                lon: None,
            },
            Timestamp::from_secs(5),
        );

        let e = p.entries().pop().unwrap();
        assert_eq!(Some("s1"), e.session_id.as_deref());
        assert_eq!(Some(1.0), e.lat);
        assert_eq!(5, e.last_seen);
    }

    #[test]
    fn evicts_only_past_timeout() {
        let p = PresenceTable::open(None);
        p.upsert(beat("trinity", "s1"), Timestamp::from_secs(0));
        p.upsert(beat("neo", "s2"), Timestamp::from_secs(10));

        // exactly at the timeout is still alive
        let timeout = Duration::from_secs(45);
        assert!(p
            .evict_older_than(timeout, Timestamp::from_secs(45))
            .is_empty());

        assert_eq!(
            vec!["trinity".to_string()],
            p.evict_older_than(timeout, Timestamp::from_secs(50))
        );
        assert_eq!(vec!["neo".to_string()], p.list());

        // evicted once, never again
        assert!(p
            .evict_older_than(timeout, Timestamp::from_secs(50))
            .is_empty());
    }

    #[test]
    fn touch_renews_without_join() {
        let p = PresenceTable::open(None);
        p.touch("neo", Timestamp::from_secs(0));
        assert!(p.contains("neo"));

        p.touch("neo", Timestamp::from_secs(40));
        assert!(p
            .evict_older_than(Duration::from_secs(45), Timestamp::from_secs(50))
            .is_empty());

        // already present, so a heartbeat is not a join, and the
        // session-less lease is adopted by the session renewing it
        assert_eq!(
            Renewal::Renewed,
            p.upsert(beat("neo", "s1"), Timestamp::from_secs(50))
        );
        assert_eq!(Some("s1"), p.entries()[0].session_id.as_deref());
    }

    #[test]
    fn first_claim_wins() {
        let p = PresenceTable::open(None);
        assert_eq!(
            Renewal::Joined,
            p.upsert(beat("neo", "s1"), Timestamp::from_secs(0))
        );
        assert_eq!(
            Renewal::HeldByOther,
            p.upsert(beat("neo", "s2"), Timestamp::from_secs(5))
        );

        let e = p.entries().pop().unwrap();
        assert_eq!(Some("s1"), e.session_id.as_deref());
        assert_eq!(0, e.last_seen);

        // a beat that does not say who it is renews whoever holds it
        assert_eq!(
            Renewal::Renewed,
            p.upsert(
                Heartbeat {
                    session_id: None,
                    ..beat("neo", "")
                },
                Timestamp::from_secs(6)
            )
        );
        assert_eq!(Some("s1"), p.entries()[0].session_id.as_deref());

        // once it lapses the other session may claim it
        p.evict_older_than(
            std::time::Duration::from_secs(45),
            Timestamp::from_secs(60),
        );
        assert_eq!(
            Renewal::Joined,
            p.upsert(beat("neo", "s2"), Timestamp::from_secs(60))
        );
    }
}
