//! The channel topic singleton.

use crate::*;

/// The current channel topic.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Topic {
    /// Topic text.
    #[serde(rename = "topic")]
    pub text: String,

    /// Who set it.
    pub author: String,

    /// When it was set, `YYYY.MM.DD HH:MM:SS`.
    #[serde(rename = "modified", default)]
    pub modified_at: String,
}

impl Topic {
    /// A topic set by `author` at `now`.
    pub fn new(
        text: impl Into<String>,
        author: impl Into<String>,
        now: Timestamp,
    ) -> Self {
        Self {
            text: text.into(),
            author: author.into(),
            modified_at: now.to_topic_format(),
        }
    }
}

/// The body posted to the `topic` action.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SetTopic {
    /// The new topic text.
    pub topic: String,

    /// Who is setting it. The relay substitutes `Admin` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn topic_wire_format() {
        let t = Topic::new("red pill", "morpheus", Timestamp::from_secs(0));
        assert_eq!(
            r#"{"topic":"red pill","author":"morpheus","modified":"1970.01.01 00:00:00"}"#,
            serde_json::to_string(&t).unwrap()
        );
    }
}
