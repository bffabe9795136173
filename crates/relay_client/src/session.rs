//! The client session context.

use chatrelay_api::*;

use crate::SessionId;

/// Identity of a message in the local view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageId {
    /// A local echo not yet confirmed, or a local note.
    Local(u64),

    /// The id the relay assigned.
    Confirmed(RecordId),
}

/// One entry of the local message view.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewMessage {
    /// Local or relay identity.
    pub id: MessageId,

    /// Message or system event.
    pub kind: RecordKind,

    /// The message text.
    pub text: String,

    /// The author, if any.
    pub user: Option<String>,

    /// RFC 3339 time. Local until confirmed.
    pub timestamp: String,

    /// Client-side notes are never sent to the relay.
    pub local_only: bool,
}

impl From<Record> for ViewMessage {
    fn from(r: Record) -> Self {
        Self {
            id: MessageId::Confirmed(r.id),
            kind: r.kind,
            text: r.text,
            user: r.user,
            timestamp: r.timestamp,
            local_only: false,
        }
    }
}

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncState {
    /// Not joined, or left.
    #[default]
    Disconnected,

    /// Settling on an effective nickname.
    Negotiating,

    /// Joined, loops running.
    Polling,
}

/// The outcome of merging a polled batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Merged {
    /// Records not already in the view.
    pub added: usize,

    /// One of the added records announced a topic change.
    pub topic_changed: bool,
}

/// All client state for one chat session.
///
/// Network completions carry the generation they were issued under.
/// Joining, leaving and stopping start a new generation, so anything
/// still in flight from before is dropped when it lands.
#[derive(Debug, Clone)]
pub struct Session {
    session_id: SessionId,
    channel: String,
    nickname: String,
    chat_nickname: Option<String>,
    messages: Vec<ViewMessage>,
    cursor: RecordId,
    users: Vec<String>,
    topic: Option<Topic>,
    is_server_online: bool,
    state: SyncState,
    generation: u64,
    next_local: u64,
}

impl Session {
    /// A disconnected session.
    pub fn new(session_id: SessionId, channel: impl Into<String>) -> Self {
        Self {
            session_id,
            channel: channel.into(),
            nickname: String::new(),
            chat_nickname: None,
            messages: Vec::new(),
            cursor: RecordId::ZERO,
            users: Vec::new(),
            topic: None,
            is_server_online: true,
            state: SyncState::Disconnected,
            generation: 0,
            next_local: 0,
        }
    }

    /// The stable session id.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// The nickname the user asked for.
    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    /// The nickname actually in use on the relay, once negotiated.
    pub fn chat_nickname(&self) -> Option<&str> {
        self.chat_nickname.as_deref()
    }

    /// The effective nickname if negotiated, else the desired one.
    pub fn active_nickname(&self) -> &str {
        self.chat_nickname.as_deref().unwrap_or(&self.nickname)
    }

    /// The local message view, in display order.
    pub fn messages(&self) -> &[ViewMessage] {
        &self.messages
    }

    /// The highest record id consumed.
    pub fn cursor(&self) -> RecordId {
        self.cursor
    }

    /// Other users present, as of the last refresh.
    pub fn users(&self) -> &[String] {
        &self.users
    }

    /// The topic, once fetched.
    pub fn topic(&self) -> Option<&Topic> {
        self.topic.as_ref()
    }

    /// False since the last failed call to the relay, until one succeeds.
    pub fn is_server_online(&self) -> bool {
        self.is_server_online
    }

    /// Lifecycle state.
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// The current generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True if work issued under `generation` may still touch this session.
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.state != SyncState::Disconnected
    }

    /// Start joining as `nickname`, resetting the view and starting the
    /// cursor at `cursor`. Returns the new generation.
    pub fn begin_join(&mut self, nickname: &str, cursor: RecordId) -> u64 {
        self.generation += 1;
        self.nickname = nickname.to_string();
        self.chat_nickname = None;
        self.messages.clear();
        self.users.clear();
        self.cursor = cursor;
        self.state = SyncState::Negotiating;
        self.generation
    }

    /// Settle the effective nickname after join negotiation, noting
    /// locally if the desired one was taken.
    pub fn settle_join(&mut self, generation: u64, effective: String) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        if effective != self.nickname {
            self.push_note(format!(
                "*** Nickname '{}' is taken. You are connected as '{}'.",
                self.nickname, effective
            ));
        }
        self.chat_nickname = Some(effective);
        true
    }

    /// Enter the polling state.
    pub fn start_polling(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.state = SyncState::Polling;
        true
    }

    /// Switch the desired nickname. If connected, the session goes back to
    /// negotiating and the current generation is returned.
    pub fn begin_rename(&mut self, nickname: &str) -> Option<u64> {
        self.nickname = nickname.to_string();
        if self.state == SyncState::Disconnected {
            return None;
        }
        self.chat_nickname = None;
        self.state = SyncState::Negotiating;
        Some(self.generation)
    }

    /// Settle the effective nickname after a rename and resume polling.
    pub fn settle_rename(
        &mut self,
        generation: u64,
        effective: String,
    ) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        let mut note = format!("*** Your nickname is now {effective}");
        if effective != self.nickname {
            note.push_str(&format!(" (original '{}' was taken)", self.nickname));
        }
        self.chat_nickname = Some(effective);
        self.state = SyncState::Polling;
        self.push_note(note);
        true
    }

    /// Stop, starting a new generation so stragglers are dropped.
    pub fn disconnect(&mut self) {
        self.state = SyncState::Disconnected;
        self.generation += 1;
    }

    /// The heartbeat to send, if polling under a negotiated nickname.
    pub fn heartbeat(&self, lat: Option<f64>, lon: Option<f64>) -> Option<Heartbeat> {
        match (&self.state, &self.chat_nickname) {
            (SyncState::Polling, Some(nickname)) => Some(Heartbeat {
                nickname: nickname.clone(),
                session_id: Some(self.session_id.to_string()),
                lat,
                lon,
            }),
            _ => None,
        }
    }

    /// The heartbeat claiming `nickname` while negotiating under
    /// `generation`. The claim is not the settled nickname until
    /// [Session::settle_join] or [Session::settle_rename].
    pub fn claim_heartbeat(
        &self,
        generation: u64,
        nickname: &str,
        lat: Option<f64>,
        lon: Option<f64>,
    ) -> Option<Heartbeat> {
        if !self.is_current(generation) || self.state != SyncState::Negotiating
        {
            return None;
        }
        Some(Heartbeat {
            nickname: nickname.to_string(),
            session_id: Some(self.session_id.to_string()),
            lat,
            lon,
        })
    }

    /// The leave to send, if connected under a negotiated nickname.
    /// A desired nickname still being negotiated may belong to someone
    /// else and is never left.
    pub fn leave(&self) -> Option<Leave> {
        if self.state == SyncState::Disconnected {
            return None;
        }
        self.chat_nickname.as_ref().map(|nickname| Leave {
            nickname: nickname.clone(),
        })
    }

    /// Merge a polled batch: records already in the view are skipped, the
    /// rest appended in order, and the cursor advanced.
    pub fn merge_polled(
        &mut self,
        generation: u64,
        records: Vec<Record>,
    ) -> Option<Merged> {
        if !self.is_current(generation) {
            return None;
        }

        let mut merged = Merged::default();

        for record in records {
            self.advance_cursor(record.id);

            if self.has_confirmed(record.id) {
                continue;
            }

            merged.added += 1;
            merged.topic_changed |= record.is_topic_change();
            self.messages.push(record.into());
        }

        Some(merged)
    }

    /// Show an outgoing record right away under a local id.
    pub fn push_local_echo(&mut self, record: &NewRecord) -> u64 {
        let local_id = self.next_local_id();
        self.messages.push(ViewMessage {
            id: MessageId::Local(local_id),
            kind: record.kind,
            text: record.text.clone(),
            user: record.user.clone(),
            timestamp: Timestamp::now().to_rfc3339(),
            local_only: false,
        });
        local_id
    }

    /// Show a client-side system note.
    pub fn push_note(&mut self, text: impl Into<String>) -> u64 {
        let local_id = self.next_local_id();
        self.messages.push(ViewMessage {
            id: MessageId::Local(local_id),
            kind: RecordKind::System,
            text: text.into(),
            user: None,
            timestamp: Timestamp::now().to_rfc3339(),
            local_only: true,
        });
        local_id
    }

    /// Reconcile the local echo `local_id` with the relay's copy.
    ///
    /// If a poll already brought the relay's copy in, the echo is dropped.
    /// Otherwise the echo takes the relay's id and timestamp. Either way
    /// exactly one copy remains, and the cursor covers the record.
    pub fn reconcile(
        &mut self,
        generation: u64,
        local_id: u64,
        record: Record,
    ) -> bool {
        if !self.is_current(generation) {
            return false;
        }

        let local = self
            .messages
            .iter()
            .position(|m| m.id == MessageId::Local(local_id));

        if self.has_confirmed(record.id) {
            if let Some(idx) = local {
                self.messages.remove(idx);
            }
        } else if let Some(idx) = local {
            let m = &mut self.messages[idx];
            m.id = MessageId::Confirmed(record.id);
            m.timestamp = record.timestamp;
        }

        self.advance_cursor(record.id);
        true
    }

    /// Record whether the relay answered.
    pub fn set_online(&mut self, generation: u64, online: bool) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.is_server_online = online;
        true
    }

    /// Replace the user list, leaving out our own nickname.
    pub fn set_users(&mut self, generation: u64, users: Vec<String>) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        let me = self.active_nickname().to_string();
        self.users = users.into_iter().filter(|u| *u != me).collect();
        true
    }

    /// Replace the topic. If `announce`, show it as a local note.
    pub fn set_topic(
        &mut self,
        generation: u64,
        topic: Topic,
        announce: bool,
    ) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        if announce {
            self.push_note(format!(
                "*** Topic for #{}: {}",
                self.channel, topic.text
            ));
        }
        self.topic = Some(topic);
        true
    }

    /// Empty the local view. The cursor is kept.
    pub fn clear_history(&mut self) {
        self.messages.clear();
    }

    fn has_confirmed(&self, id: RecordId) -> bool {
        self.messages
            .iter()
            .any(|m| m.id == MessageId::Confirmed(id))
    }

    fn advance_cursor(&mut self, id: RecordId) {
        if id > self.cursor {
            self.cursor = id;
        }
    }

    fn next_local_id(&mut self) -> u64 {
        self.next_local += 1;
        self.next_local
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const T0: i64 = 1_700_000_000;

    fn record(secs: i64, text: &str) -> Record {
        NewRecord::chat("neo", text).into_record(
            IdGenerator::new(1).next_at(Timestamp::from_secs(T0 + secs)),
            Timestamp::from_secs(T0 + secs),
        )
    }

    fn joined() -> (Session, u64) {
        let mut s = Session::new(SessionId::from("sess-a".to_string()), "relay");
        let g = s.begin_join(
            "neo",
            RecordId::from_timestamp(Timestamp::from_secs(T0)),
        );
        assert!(s.settle_join(g, "neo".into()));
        assert!(s.start_polling(g));
        (s, g)
    }

    fn confirmed(s: &Session) -> Vec<&str> {
        s.messages().iter().map(|m| m.text.as_str()).collect()
    }

    #[test]
    fn merge_skips_known_and_advances_cursor() {
        let (mut s, g) = joined();
        let a = record(1, "a");
        let b = record(2, "b");

        let m = s.merge_polled(g, vec![a.clone(), b.clone()]).unwrap();
        assert_eq!(2, m.added);
        assert_eq!(b.id, s.cursor());

        // an overlapping tick returns the same records again
        let m = s.merge_polled(g, vec![a, b]).unwrap();
        assert_eq!(0, m.added);
        assert_eq!(vec!["a", "b"], confirmed(&s));
    }

    #[test]
    fn topic_change_is_flagged() {
        let (mut s, g) = joined();
        let r = NewRecord::topic_changed("morpheus", "red pill").into_record(
            IdGenerator::new(1).next_at(Timestamp::from_secs(T0 + 1)),
            Timestamp::from_secs(T0 + 1),
        );
        assert!(s.merge_polled(g, vec![r.clone()]).unwrap().topic_changed);
        assert!(!s.merge_polled(g, vec![r]).unwrap().topic_changed);
    }

    #[test]
    fn reconcile_upgrades_echo() {
        let (mut s, g) = joined();
        let local = s.push_local_echo(&NewRecord::chat("neo", "hello"));
        let r = record(1, "hello");

        assert!(s.reconcile(g, local, r.clone()));
        assert_eq!(1, s.messages().len());
        assert_eq!(MessageId::Confirmed(r.id), s.messages()[0].id);
        assert_eq!(r.timestamp, s.messages()[0].timestamp);
        assert_eq!(r.id, s.cursor());

        // a later poll does not duplicate it
        s.merge_polled(g, vec![r]).unwrap();
        assert_eq!(vec!["hello"], confirmed(&s));
    }

    #[test]
    fn reconcile_after_poll_drops_echo() {
        let (mut s, g) = joined();
        let local = s.push_local_echo(&NewRecord::chat("neo", "hello"));
        let r = record(1, "hello");

        // the poll wins the race against the post response
        s.merge_polled(g, vec![r.clone()]).unwrap();
        assert_eq!(2, s.messages().len());

        assert!(s.reconcile(g, local, r.clone()));
        assert_eq!(1, s.messages().len());
        assert_eq!(MessageId::Confirmed(r.id), s.messages()[0].id);
    }

    #[test]
    fn stale_generation_is_dropped() {
        let (mut s, g) = joined();
        let local = s.push_local_echo(&NewRecord::chat("neo", "hello"));
        s.disconnect();

        assert!(s.merge_polled(g, vec![record(1, "late")]).is_none());
        assert!(!s.reconcile(g, local, record(2, "hello")));
        assert!(!s.set_online(g, false));
        assert!(s.is_server_online());
        assert!(matches!(s.messages()[0].id, MessageId::Local(_)));

        // rejoining starts a fresh generation
        let g2 = s.begin_join("neo", RecordId::ZERO);
        assert_ne!(g, g2);
        assert!(s.merge_polled(g, vec![record(3, "late")]).is_none());
    }

    #[test]
    fn join_notes_taken_nickname() {
        let mut s = Session::new(SessionId::from("sess-b".to_string()), "relay");
        let g = s.begin_join("neo", RecordId::ZERO);
        s.settle_join(g, "neo2".into());
        assert_eq!("neo2", s.active_nickname());
        assert_eq!(
            "*** Nickname 'neo' is taken. You are connected as 'neo2'.",
            s.messages()[0].text
        );
        assert!(s.messages()[0].local_only);

        // no heartbeat until polling
        assert!(s.heartbeat(None, None).is_none());
        s.start_polling(g);
        let beat = s.heartbeat(Some(1.0), None).unwrap();
        assert_eq!("neo2", beat.nickname);
        assert_eq!(Some("sess-b"), beat.session_id.as_deref());
    }

    #[test]
    fn rename_notes() {
        let (mut s, _) = joined();
        let g = s.begin_rename("morpheus").unwrap();
        assert!(s.heartbeat(None, None).is_none());
        s.settle_rename(g, "morpheus2".into());
        assert_eq!(SyncState::Polling, s.state());
        assert_eq!(
            "*** Your nickname is now morpheus2 (original 'morpheus' was taken)",
            s.messages().last().unwrap().text
        );

        let mut d = Session::new(SessionId::from("sess-c".to_string()), "relay");
        assert!(d.begin_rename("tank").is_none());
        assert_eq!("tank", d.nickname());
    }

    #[test]
    fn users_exclude_self_and_topic_note() {
        let (mut s, g) = joined();
        s.set_users(g, vec!["neo".into(), "trinity".into()]);
        assert_eq!(vec!["trinity".to_string()], s.users());

        s.set_topic(
            g,
            Topic::new("free your mind", "morpheus", Timestamp::from_secs(T0)),
            true,
        );
        assert_eq!(
            "*** Topic for #relay: free your mind",
            s.messages().last().unwrap().text
        );
        assert_eq!("free your mind", s.topic().unwrap().text);
    }

    #[test]
    fn leave_only_when_connected() {
        let (mut s, _) = joined();
        assert_eq!("neo", s.leave().unwrap().nickname);
        s.disconnect();
        assert!(s.leave().is_none());
    }

    #[test]
    fn no_leave_while_negotiating() {
        let mut s = Session::new(SessionId::from("sess-b".to_string()), "relay");
        let g = s.begin_join("neo", RecordId::ZERO);
        assert!(s.leave().is_none());

        // claiming is not holding
        let claim = s.claim_heartbeat(g, "neo", None, None).unwrap();
        assert_eq!("neo", claim.nickname);
        assert_eq!(Some("sess-b"), claim.session_id.as_deref());
        assert!(s.leave().is_none());

        s.settle_join(g, "neo2".into());
        assert_eq!("neo2", s.leave().unwrap().nickname);
        assert!(s.claim_heartbeat(g + 1, "neo", None, None).is_none());

        // a rename in progress leaves nothing until it settles
        s.start_polling(g);
        s.begin_rename("morpheus");
        assert!(s.leave().is_none());
    }
}
