//! Log records: chat messages and system events.

use crate::*;

/// Marker text the relay embeds in a topic change system record.
pub const TOPIC_CHANGE_MARKER: &str = "changed the topic to:";

/// The kind of a [Record].
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// A message typed by a user.
    #[default]
    Chat,

    /// An event synthesized by the relay (join, leave, topic change).
    System,
}

/// A single entry of the relay log. Records are appended, never mutated.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Record {
    /// Identity assigned by the relay at append time.
    pub id: RecordId,

    /// Message or system event.
    #[serde(rename = "type", default)]
    pub kind: RecordKind,

    /// The message text.
    pub text: String,

    /// The author. System records have none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// RFC 3339 time the relay accepted the record.
    pub timestamp: String,
}

impl Record {
    /// True if this is a system record announcing a topic change.
    pub fn is_topic_change(&self) -> bool {
        self.kind == RecordKind::System
            && self.text.contains(TOPIC_CHANGE_MARKER)
    }
}

/// A record as posted by a client, before the relay assigns identity.
///
/// Clients may echo back other fields (a provisional `id`, a local
/// `timestamp`); they are ignored.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NewRecord {
    /// Message or system event. Defaults to chat.
    #[serde(rename = "type", default)]
    pub kind: RecordKind,

    /// The message text.
    pub text: String,

    /// The author.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl NewRecord {
    /// A chat message from `user`.
    pub fn chat(user: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: RecordKind::Chat,
            text: text.into(),
            user: Some(user.into()),
        }
    }

    /// An unattributed system event.
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            kind: RecordKind::System,
            text: text.into(),
            user: None,
        }
    }

    /// "X has joined the channel".
    pub fn joined(nickname: &str) -> Self {
        Self::system(format!("*** {nickname} has joined the channel"))
    }

    /// "X has left (disconnected)", emitted on explicit leave.
    pub fn left_disconnected(nickname: &str) -> Self {
        Self::system(format!("*** {nickname} has left (disconnected)"))
    }

    /// "X has left (timeout)", emitted when a presence lease expires.
    pub fn left_timeout(nickname: &str) -> Self {
        Self::system(format!("*** {nickname} has left (timeout)"))
    }

    /// "X changed the topic to: Y".
    pub fn topic_changed(user: &str, topic: &str) -> Self {
        Self::system(format!("*** {user} {TOPIC_CHANGE_MARKER} {topic}"))
    }

    /// Stamp this record with its relay identity.
    pub fn into_record(self, id: RecordId, now: Timestamp) -> Record {
        Record {
            id,
            kind: self.kind,
            text: self.text,
            user: self.user,
            timestamp: now.to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn record_wire_format() {
        let r = NewRecord::chat("neo", "hello").into_record(
            "1700000000.1".parse().unwrap(),
            Timestamp::from_secs(1_700_000_000),
        );
        let v: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&r).unwrap()).unwrap();
        assert_eq!(
            serde_json::json!({
                "id": "1700000000.1000000000",
                "type": "chat",
                "text": "hello",
                "user": "neo",
                "timestamp": "2023-11-14T22:13:20+00:00",
            }),
            v
        );
    }

    #[test]
    fn system_records_omit_user() {
        let r = NewRecord::left_timeout("trinity")
            .into_record(RecordId::ZERO, Timestamp::from_secs(0));
        let enc = serde_json::to_string(&r).unwrap();
        assert!(!enc.contains("\"user\""));
        assert!(enc.contains("\"type\":\"system\""));
        assert_eq!("*** trinity has left (timeout)", r.text);
    }

    #[test]
    fn posted_record_tolerates_extra_fields() {
        let n: NewRecord = serde_json::from_str(
            r#"{"id":"temp-1","text":"hi","user":"neo","timestamp":"x"}"#,
        )
        .unwrap();
        assert_eq!(NewRecord::chat("neo", "hi"), n);

        assert!(serde_json::from_str::<NewRecord>(r#"{"user":"neo"}"#)
            .is_err());
    }

    #[test]
    fn topic_change_detection() {
        let r = NewRecord::topic_changed("morpheus", "red pill")
            .into_record(RecordId::ZERO, Timestamp::from_secs(0));
        assert!(r.is_topic_change());
        assert_eq!("*** morpheus changed the topic to: red pill", r.text);

        let r = NewRecord::chat("neo", "who changed the topic to: x?")
            .into_record(RecordId::ZERO, Timestamp::from_secs(0));
        assert!(!r.is_topic_change());
    }
}
