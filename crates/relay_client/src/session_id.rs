//! The stable per-client session id.

use chatrelay_api::*;
use rand::Rng;

/// A random token identifying one client installation across restarts,
/// independent of the nickname it uses.
///
/// Name negotiation treats a nickname held under this same session id as
/// a stale lease of our own, and reclaims it.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct SessionId(String);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl SessionId {
    /// Generate a fresh `sess-...` id.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let rand: String =
            (0..9).map(|_| base36_digit(rng.gen_range(0..36))).collect();
        let millis = Timestamp::now().as_micros().max(0) as u64 / 1000;
        Self(format!("sess-{rand}{}", to_base36(millis)))
    }

    /// Read the id stored at `path`, or generate one and store it there.
    pub fn load_or_create(path: &std::path::Path) -> RelayResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(s) if !s.trim().is_empty() => {
                return Ok(Self(s.trim().to_string()))
            }
            Ok(_) => (),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => (),
            Err(err) => {
                return Err(RelayError::other_src("reading session id", err))
            }
        }

        let id = Self::generate();

        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| RelayError::other_src("storing session id", e))?;
        }
        std::fs::write(path, id.0.as_bytes())
            .map_err(|e| RelayError::other_src("storing session id", e))?;

        tracing::debug!(%id, ?path, "created session id");

        Ok(id)
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn base36_digit(d: u32) -> char {
    char::from_digit(d, 36).unwrap_or('0')
}

fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".into();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(base36_digit((n % 36) as u32));
        n /= 36;
    }
    out.iter().rev().collect()
}
