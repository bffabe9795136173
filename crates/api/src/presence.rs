//! Presence lease types.

/// A heartbeat body posted to the `presence` action.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Heartbeat {
    /// The effective nickname holding the lease.
    pub nickname: String,

    /// The stable per-client session id.
    #[serde(rename = "id", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Optional latitude.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,

    /// Optional longitude.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
}

/// The body posted to the `leave` action.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Leave {
    /// The nickname giving up its lease.
    pub nickname: String,
}

/// A live presence lease, as held by the relay.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    /// The nickname holding the lease.
    pub nickname: String,

    /// The session holding the lease, if known.
    #[serde(rename = "id", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Optional latitude.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,

    /// Optional longitude.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,

    /// Epoch seconds of the last renewal.
    pub last_seen: i64,
}

impl PresenceEntry {
    /// Build a fresh lease from a heartbeat.
    pub fn from_heartbeat(beat: Heartbeat, now_secs: i64) -> Self {
        Self {
            nickname: beat.nickname,
            session_id: beat.session_id,
            lat: beat.lat,
            lon: beat.lon,
            last_seen: now_secs,
        }
    }

    /// A lease for a nickname seen without session details
    /// (e.g. the author of a posted message).
    pub fn bare(nickname: impl Into<String>, now_secs: i64) -> Self {
        Self {
            nickname: nickname.into(),
            session_id: None,
            lat: None,
            lon: None,
            last_seen: now_secs,
        }
    }
}
