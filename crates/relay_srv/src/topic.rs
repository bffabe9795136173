//! The topic register.

use chatrelay_api::*;
use std::path::Path;

use crate::store::JsonCell;

const TOPIC_FILE: &str = "chat-topic.json";

/// Holds the single current topic. Replace-only.
pub struct TopicRegister {
    cell: JsonCell<Topic>,
}

impl TopicRegister {
    /// Open the register, loading `chat-topic.json` from `dir` if given.
    /// `initial` is used when nothing usable is stored.
    pub fn open(dir: Option<&Path>, initial: Topic) -> Self {
        Self {
            cell: JsonCell::open("topic", dir, TOPIC_FILE, move || initial),
        }
    }

    /// The current topic.
    pub fn get(&self) -> Topic {
        self.cell.read(|t| t.clone())
    }

    /// Replace the topic, returning the new value.
    ///
    /// Announcing the change in the log is the caller's job, see
    /// [crate::Relay::set_topic].
    pub fn set(&self, text: String, author: String, now: Timestamp) -> Topic {
        self.cell.update(|t| {
            *t = Topic::new(text, author, now);
            (t.clone(), true)
        })
    }
}
