//! The relay actions, independent of http.

use chatrelay_api::*;

use crate::log::AppendLog;
use crate::presence::{PresenceTable, Renewal};
use crate::sweep::{SweepReport, Sweeper};
use crate::topic::TopicRegister;
use crate::Config;

/// All relay state and the actions clients can perform on it.
///
/// Every method takes its notion of "now" explicitly.
pub struct Relay {
    log: AppendLog,
    presence: PresenceTable,
    topic: TopicRegister,
    sweeper: Sweeper,
    default_author: String,
}

impl Relay {
    /// Construct a relay, loading any stored state from
    /// `config.data_dir`.
    pub fn new(config: &Config) -> Self {
        Self::with_generator(config, IdGenerator::for_process())
    }

    /// Construct a relay with a specific id generator.
    pub fn with_generator(config: &Config, ids: IdGenerator) -> Self {
        let dir = config.data_dir.as_deref();
        Self {
            log: AppendLog::with_generator(ids, dir),
            presence: PresenceTable::open(dir),
            topic: TopicRegister::open(
                dir,
                Topic::new(
                    config.default_topic.clone(),
                    config.default_topic_author.clone(),
                    Timestamp::now(),
                ),
            ),
            sweeper: Sweeper::new(
                config.presence_timeout,
                config.relay_window,
            ),
            default_author: config.default_topic_author.clone(),
        }
    }

    /// Run maintenance, unless someone else already is.
    pub fn maintain(&self, now: Timestamp) -> Option<SweepReport> {
        self.sweeper.sweep(&self.log, &self.presence, now)
    }

    /// Records after `since`, or the whole log.
    pub fn messages(&self, since: Option<RecordId>) -> Vec<Record> {
        match since {
            Some(cursor) if !cursor.is_zero() => self.log.read_since(cursor),
            _ => self.log.read_all(),
        }
    }

    /// Append a posted record. Posting renews the author's lease.
    pub fn post_message(&self, record: NewRecord, now: Timestamp) -> Record {
        let user = record.user.clone();
        let record = self.log.append(record, now);

        if let Some(user) = user {
            self.presence.touch(&user, now);
        }

        record
    }

    /// The current topic.
    pub fn topic(&self) -> Topic {
        self.topic.get()
    }

    /// Replace the topic and announce it in the log.
    pub fn set_topic(&self, req: SetTopic, now: Timestamp) -> Topic {
        let user = req.user.unwrap_or_else(|| self.default_author.clone());
        let topic = self.topic.set(req.topic, user.clone(), now);
        self.log
            .append(NewRecord::topic_changed(&user, &topic.text), now);
        topic
    }

    /// Renew a lease. If the nickname was absent, a join record is
    /// appended and returned. A nickname leased to another session is
    /// left alone.
    pub fn heartbeat(&self, beat: Heartbeat, now: Timestamp) -> Option<Record> {
        let nickname = beat.nickname.clone();

        match self.presence.upsert(beat, now) {
            Renewal::Joined => {
                tracing::debug!(%nickname, "joined");
                Some(self.log.append(NewRecord::joined(&nickname), now))
            }
            Renewal::Renewed => None,
            Renewal::HeldByOther => {
                tracing::debug!(%nickname, "nickname held by another session");
                None
            }
        }
    }

    /// Drop a lease and announce the departure.
    pub fn leave(&self, nickname: &str, now: Timestamp) -> Record {
        if !self.presence.remove(nickname) {
            tracing::debug!(%nickname, "leave for a nickname not present");
        }
        self.log.append(NewRecord::left_disconnected(nickname), now)
    }

    /// Nicknames currently holding a lease.
    pub fn users(&self) -> Vec<String> {
        self.presence.list()
    }

    /// The full leases currently held.
    pub fn presence(&self) -> Vec<PresenceEntry> {
        self.presence.entries()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    const T0: i64 = 1_700_000_000;

    fn at(secs: i64) -> Timestamp {
        Timestamp::from_secs(T0 + secs)
    }

    fn relay() -> Relay {
        Relay::with_generator(&Config::testing(), IdGenerator::new(5))
    }

    fn beat(nick: &str, sess: &str) -> Heartbeat {
        Heartbeat {
            nickname: nick.into(),
            session_id: Some(sess.into()),
            lat: None,
            lon: None,
        }
    }

    #[test]
    fn heartbeat_joins_once() {
        let r = relay();
        let j = r.heartbeat(beat("neo", "s1"), at(0)).unwrap();
        assert_eq!("*** neo has joined the channel", j.text);
        assert!(r.heartbeat(beat("neo", "s1"), at(10)).is_none());
        assert!(r.heartbeat(beat("neo", "s1"), at(20)).is_none());

        let joins = r
            .messages(None)
            .into_iter()
            .filter(|m| m.text.contains("joined"))
            .count();
        assert_eq!(1, joins);
    }

    #[test]
    fn heartbeat_cannot_take_over_a_lease() {
        let r = relay();
        assert!(r.heartbeat(beat("neo", "sA"), at(0)).is_some());
        assert!(r.heartbeat(beat("neo", "sB"), at(1)).is_none());

        let held = r.presence();
        assert_eq!(1, held.len());
        assert_eq!(Some("sA"), held[0].session_id.as_deref());
        assert_eq!(1, r.messages(None).len());
    }

    #[test]
    fn leave_then_heartbeat_rejoins() {
        let r = relay();
        r.heartbeat(beat("neo", "s1"), at(0));
        let l = r.leave("neo", at(1));
        assert_eq!("*** neo has left (disconnected)", l.text);
        assert!(r.users().is_empty());
        assert!(r.heartbeat(beat("neo", "s1"), at(2)).is_some());
    }

    #[test]
    fn leave_for_absent_still_announces() {
        let r = relay();
        r.leave("ghost", at(0));
        assert_eq!(1, r.messages(None).len());
    }

    #[test]
    fn posting_renews_lease() {
        let r = relay();
        r.heartbeat(beat("neo", "s1"), at(0));
        r.post_message(NewRecord::chat("neo", "hi"), at(40));

        let rep = r.maintain(at(50)).unwrap();
        assert!(rep.evicted.is_empty());
        assert_eq!(vec!["neo".to_string()], r.users());
    }

    #[test]
    fn topic_change_is_announced() {
        let r = relay();
        let t = r.set_topic(
            SetTopic {
                topic: "red pill".into(),
                user: None,
            },
            at(0),
        );
        assert_eq!("Admin", t.author);
        assert_eq!(t, r.topic());

        let log = r.messages(None);
        assert_eq!(1, log.len());
        assert!(log[0].is_topic_change());
        assert_eq!("*** Admin changed the topic to: red pill", log[0].text);
    }

    #[test]
    fn since_zero_is_everything() {
        let r = relay();
        r.post_message(NewRecord::chat("neo", "a"), at(0));
        r.post_message(NewRecord::chat("neo", "b"), at(1));
        assert_eq!(2, r.messages(Some(RecordId::ZERO)).len());
        assert_eq!(2, r.messages(None).len());
    }

    #[test]
    fn neo_scenario() {
        let r = relay();

        // A joins as neo, B joins (negotiated elsewhere) as neo2
        r.heartbeat(beat("neo", "sA"), at(0));
        let b_cursor = RecordId::from_timestamp(at(1) - Duration::from_millis(500));
        r.heartbeat(beat("neo2", "sB"), at(1));

        r.post_message(NewRecord::chat("neo", "hello"), at(2));

        let got = r.messages(Some(b_cursor));
        let hellos = got.iter().filter(|m| m.text == "hello").count();
        assert_eq!(1, hellos);
        assert!(got.iter().any(|m| m.text == "*** neo2 has joined the channel"));
        assert!(!got.iter().any(|m| m.text == "*** neo has joined the channel"));
    }
}
