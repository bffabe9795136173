use chatrelay_api::*;

/// The http method of a relay request, as far as routing cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMethod {
    /// GET
    Get,
    /// POST
    Post,
    /// Anything else. Only `users` answers to it.
    Other,
}

/// A relay request, validated: [crate::protocol#2-rest-api].
///
/// Anything that does not parse into one of the known actions, including
/// a known action with a malformed body, becomes [RelayAction::NotFound].
#[derive(Debug, PartialEq)]
pub enum RelayAction {
    /// `GET messages`
    MessagesGet {
        /// Only records after this cursor.
        since: Option<RecordId>,
    },
    /// `POST messages`
    MessagesPost(NewRecord),
    /// `GET topic`
    TopicGet,
    /// `POST topic`
    TopicPost(SetTopic),
    /// `GET presence`
    PresenceGet,
    /// `POST presence`
    PresencePost(Heartbeat),
    /// `POST leave`
    LeavePost(Leave),
    /// `users`
    Users,
    /// Unknown action or malformed payload.
    NotFound(String),
}

impl RelayAction {
    /// Parse an action from the request method, the `action` and `since`
    /// query parameters, and the body.
    pub fn parse(
        method: RelayMethod,
        action: Option<&str>,
        since: Option<&str>,
        body: &[u8],
    ) -> Self {
        let action = match action {
            None | Some("chat.php") => "messages",
            Some(action) => action,
        };

        let out = match (action, method) {
            ("messages", RelayMethod::Get) => Some(RelayAction::MessagesGet {
                since: since
                    .and_then(|s| s.parse::<RecordId>().ok())
                    .filter(|s| !s.is_zero()),
            }),
            ("messages", RelayMethod::Post) => {
                json(body).map(RelayAction::MessagesPost)
            }
            ("topic", RelayMethod::Get) => Some(RelayAction::TopicGet),
            ("topic", RelayMethod::Post) => {
                json(body).map(RelayAction::TopicPost)
            }
            ("presence", RelayMethod::Get) => Some(RelayAction::PresenceGet),
            ("presence", RelayMethod::Post) => json::<Heartbeat>(body)
                .filter(|b| !b.nickname.trim().is_empty())
                .map(RelayAction::PresencePost),
            ("leave", RelayMethod::Post) => json::<Leave>(body)
                .filter(|b| !b.nickname.trim().is_empty())
                .map(RelayAction::LeavePost),
            ("users", _) => Some(RelayAction::Users),
            _ => None,
        };

        out.unwrap_or_else(|| RelayAction::NotFound(action.to_string()))
    }

    /// Whether maintenance should run before this action.
    /// Topic reads tolerate staleness and skip it.
    pub fn runs_maintenance(&self) -> bool {
        !matches!(self, RelayAction::TopicGet)
    }
}

fn json<T: serde::de::DeserializeOwned>(body: &[u8]) -> Option<T> {
    match serde_json::from_slice(body) {
        Ok(t) => Some(t),
        Err(err) => {
            tracing::debug!(?err, "ignoring malformed relay payload");
            None
        }
    }
}
