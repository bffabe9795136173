/// Chatrelay timestamp.
///
/// Internally i64 microseconds from unix epoch. Every relay operation
/// takes its "now" as one of these, so eviction and pruning can be
/// driven by a test clock.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Construct a new timestamp of "now".
    pub fn now() -> Self {
        std::time::SystemTime::now().into()
    }

    /// Construct a timestamp from i64 microseconds since unix epoch.
    pub fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    /// Construct a timestamp from whole seconds since unix epoch.
    pub fn from_secs(secs: i64) -> Self {
        Self(secs.saturating_mul(1_000_000))
    }

    /// Get the i64 microseconds since unix epoch.
    pub fn as_micros(&self) -> i64 {
        self.0
    }

    /// Get the whole seconds since unix epoch (rounded down).
    pub fn as_secs(&self) -> i64 {
        self.0.div_euclid(1_000_000)
    }

    /// RFC 3339 rendering used for the `timestamp` field of records.
    pub fn to_rfc3339(&self) -> String {
        match chrono::DateTime::<chrono::Utc>::from_timestamp_micros(self.0) {
            Some(dt) => dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, false),
            None => String::new(),
        }
    }

    /// `YYYY.MM.DD HH:MM:SS` rendering used for the topic `modified` field.
    pub fn to_topic_format(&self) -> String {
        match chrono::DateTime::<chrono::Utc>::from_timestamp_micros(self.0) {
            Some(dt) => dt.format("%Y.%m.%d %H:%M:%S").to_string(),
            None => String::new(),
        }
    }
}

impl std::ops::Add<std::time::Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: std::time::Duration) -> Self::Output {
        Timestamp(self.0 + rhs.as_micros() as i64)
    }
}

impl std::ops::AddAssign<std::time::Duration> for Timestamp {
    fn add_assign(&mut self, rhs: std::time::Duration) {
        self.0 += rhs.as_micros() as i64;
    }
}

impl std::ops::Sub<std::time::Duration> for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: std::time::Duration) -> Self::Output {
        Timestamp(self.0.saturating_sub(rhs.as_micros() as i64))
    }
}

impl std::ops::Sub for Timestamp {
    type Output = Result<std::time::Duration, ()>;

    fn sub(self, rhs: Self) -> Self::Output {
        if self.0 < rhs.0 {
            Err(())
        } else {
            Ok(std::time::Duration::from_micros((self.0 - rhs.0) as u64))
        }
    }
}

impl From<std::time::SystemTime> for Timestamp {
    fn from(t: std::time::SystemTime) -> Self {
        match t.duration_since(std::time::SystemTime::UNIX_EPOCH) {
            Ok(d) => Self(d.as_micros() as i64),
            Err(e) => Self(-(e.duration().as_micros() as i64)),
        }
    }
}
