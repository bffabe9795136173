//! Lock-guarded, optionally file-backed state cells.
//!
//! ### Rationale
//!
//! - The relay holds three independent units of state: the record log,
//!   the presence table, and the topic. Each is small (the log is bounded
//!   by the relay window), so each fits comfortably in memory.
//! - Each unit gets its own lock so that, e.g., a heartbeat does not wait
//!   on a topic change.
//! - Durability is best-effort. Losing the last few seconds of a relay
//!   window on crash is acceptable; blocking or failing requests because
//!   the disk is unhappy is not.
//!
//! ### Implementation
//!
//! - The authoritative value lives behind a [std::sync::RwLock]. Readers
//!   take the shared lock, writers the exclusive one.
//! - If a file path is configured, every change is written through while
//!   the exclusive lock is still held, so the file never goes backwards.
//!   The write goes to a [tempfile::NamedTempFile] in the same directory
//!   which is then renamed over the target, so a reader of the file never
//!   observes a torn write.
//! - A file that is missing or cannot be parsed on open is treated as
//!   empty. A failure to persist is logged and otherwise ignored.

use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

/// A single lock-guarded unit of relay state.
pub struct JsonCell<T> {
    name: &'static str,
    path: Option<PathBuf>,
    value: RwLock<T>,
}

impl<T> JsonCell<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    /// Construct a memory-only cell.
    pub fn memory(name: &'static str, init: T) -> Self {
        Self {
            name,
            path: None,
            value: RwLock::new(init),
        }
    }

    /// Open a cell backed by `dir/file_name`, or memory-only if `dir`
    /// is `None`. `init` supplies the value when there is nothing usable
    /// on disk.
    pub fn open(
        name: &'static str,
        dir: Option<&Path>,
        file_name: &str,
        init: impl FnOnce() -> T,
    ) -> Self {
        let path = match dir {
            None => return Self::memory(name, init()),
            Some(dir) => dir.join(file_name),
        };

        let value = match load(name, &path) {
            Some(value) => value,
            None => init(),
        };

        Self {
            name,
            path: Some(path),
            value: RwLock::new(value),
        }
    }

    /// Read the value under the shared lock.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = self.value.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    /// Mutate the value under the exclusive lock. The closure reports
    /// whether it actually changed anything; only changes are persisted.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> (R, bool)) -> R {
        let mut guard =
            self.value.write().unwrap_or_else(PoisonError::into_inner);

        let (out, changed) = f(&mut guard);

        if changed {
            if let Some(path) = &self.path {
                if let Err(err) = persist(path, &*guard) {
                    tracing::warn!(
                        cell = self.name,
                        ?path,
                        ?err,
                        "failed to persist relay state"
                    );
                }
            }
        }

        out
    }
}

fn load<T: serde::de::DeserializeOwned>(
    name: &'static str,
    path: &Path,
) -> Option<T> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(cell = name, ?path, "no stored state, starting empty");
            return None;
        }
        Err(err) => {
            tracing::warn!(cell = name, ?path, ?err, "unreadable state, starting empty");
            return None;
        }
    };

    match serde_json::from_slice(&data) {
        Ok(value) => {
            tracing::info!(cell = name, ?path, "loaded stored state");
            Some(value)
        }
        Err(err) => {
            tracing::warn!(cell = name, ?path, ?err, "corrupt state, starting empty");
            None
        }
    }
}

fn persist<T: serde::Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    use std::io::Write;

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer(&mut tmp, value)?;
    tmp.flush()?;
    tmp.as_file().sync_data()?;
    tmp.persist(path).map_err(|err| err.error)?;

    Ok(())
}
