//! Client configuration types.

use chatrelay_api::*;

/// Configuration parameters for a [SyncEngine](crate::SyncEngine).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// The url of the relay endpoint. E.g. `https://example.com/chat.php`.
    /// The `action` and `since` query parameters are appended to it.
    pub server_url: String,

    /// The channel name shown in local topic notes.
    /// Default: "relay".
    pub channel: String,

    /// Foreground sync interval.
    /// Default: 2 seconds.
    pub sync_interval_ms: u32,

    /// While not visible, sync at most this often.
    /// Default: 30 seconds.
    pub background_sync_interval_ms: u32,

    /// Presence heartbeat interval, independent of visibility. Must stay
    /// well below the relay's presence timeout.
    /// Default: 10 seconds.
    pub heartbeat_interval_ms: u32,

    /// On join the cursor starts this far before "now", so the join
    /// record for this session is still caught.
    /// Default: 500 ms.
    pub join_cursor_offset_ms: u32,

    /// Per request timeout.
    /// Default: 10 seconds.
    pub request_timeout_ms: u32,

    /// Latitude sent with heartbeats, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,

    /// Longitude sent with heartbeats, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "<https://your.relay.url>".into(),
            channel: "relay".into(),
            sync_interval_ms: 2000,
            background_sync_interval_ms: 1000 * 30,
            heartbeat_interval_ms: 1000 * 10,
            join_cursor_offset_ms: 500,
            request_timeout_ms: 1000 * 10,
            lat: None,
            lon: None,
        }
    }
}

impl ClientConfig {
    /// A config pointing at `server_url` with default timings.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Default::default()
        }
    }

    /// Check the server url is a usable http(s) url.
    pub fn validate(&self) -> RelayResult<()> {
        self.parsed_url().map(|_| ())
    }

    pub(crate) fn parsed_url(&self) -> RelayResult<url::Url> {
        const ERR: &str = "invalid relay server_url";

        let url = url::Url::parse(&self.server_url)
            .map_err(|e| RelayError::other_src(ERR, e))?;

        if url.cannot_be_a_base() {
            return Err(RelayError::other(ERR));
        }

        match url.scheme() {
            "http" | "https" => Ok(url),
            _ => Err(RelayError::other(ERR)),
        }
    }

    /// Get the foreground sync interval.
    pub fn sync_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.sync_interval_ms as u64)
    }

    /// Get the background sync interval.
    pub fn background_sync_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(
            self.background_sync_interval_ms as u64,
        )
    }

    /// Get the heartbeat interval.
    pub fn heartbeat_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.heartbeat_interval_ms as u64)
    }

    /// Get the join cursor offset.
    pub fn join_cursor_offset(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.join_cursor_offset_ms as u64)
    }

    /// Get the request timeout.
    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.request_timeout_ms as u64)
    }
}
