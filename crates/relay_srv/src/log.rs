//! The append-only record log.

use chatrelay_api::*;
use std::path::Path;

use crate::store::JsonCell;

const LOG_FILE: &str = "chat-log.json";

/// The relay's record log.
///
/// Identity is assigned under the same exclusive lock as the append
/// itself, so the read order of the log is always ascending by id.
pub struct AppendLog {
    ids: IdGenerator,
    cell: JsonCell<Vec<Record>>,
}

impl AppendLog {
    /// Open the log, loading `chat-log.json` from `dir` if given.
    #[cfg(test)]
    pub fn open(dir: Option<&Path>) -> Self {
        Self::with_generator(IdGenerator::for_process(), dir)
    }

    /// Open the log with a specific id generator.
    pub fn with_generator(ids: IdGenerator, dir: Option<&Path>) -> Self {
        Self {
            ids,
            cell: JsonCell::open("log", dir, LOG_FILE, Vec::new),
        }
    }

    /// Append a record, returning it as persisted.
    pub fn append(&self, record: NewRecord, now: Timestamp) -> Record {
        self.cell.update(|log| {
            let record = record.into_record(self.ids.next_at(now), now);
            log.push(record.clone());
            (record, true)
        })
    }

    /// Append several records under one lock, in order.
    pub fn append_all(
        &self,
        records: Vec<NewRecord>,
        now: Timestamp,
    ) -> Vec<Record> {
        if records.is_empty() {
            return Vec::new();
        }

        self.cell.update(|log| {
            let out = records
                .into_iter()
                .map(|r| r.into_record(self.ids.next_at(now), now))
                .collect::<Vec<_>>();
            log.extend(out.iter().cloned());
            (out, true)
        })
    }

    /// Every record currently held, in append order.
    pub fn read_all(&self) -> Vec<Record> {
        self.cell.read(|log| log.clone())
    }

    /// Every record with an id strictly greater than `cursor`,
    /// in append order.
    pub fn read_since(&self, cursor: RecordId) -> Vec<Record> {
        self.cell.read(|log| {
            log.iter().filter(|r| r.id > cursor).cloned().collect()
        })
    }

    /// Drop every record that is at least `window` old as of `now`.
    /// Returns the count removed.
    pub fn prune_older_than(
        &self,
        window: std::time::Duration,
        now: Timestamp,
    ) -> usize {
        self.cell.update(|log| {
            let before = log.len();
            log.retain(|r| match now - r.id.as_timestamp() {
                Ok(age) => age < window,
                // generated "in the future" relative to now, keep it
                Err(_) => true,
            });
            let pruned = before - log.len();
            (pruned, pruned > 0)
        })
    }

    /// Record count.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.cell.read(|log| log.len())
    }

    /// True if the log holds no records.
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    const T0: i64 = 1_700_000_000;

    fn at(secs: f64) -> Timestamp {
        Timestamp::from_micros(T0 * 1_000_000 + (secs * 1_000_000.0) as i64)
    }

    fn log() -> AppendLog {
        AppendLog::with_generator(IdGenerator::new(1), None)
    }

    #[test]
    fn append_assigns_increasing_ids() {
        let l = log();
        let a = l.append(NewRecord::chat("neo", "a"), at(0.0));
        let b = l.append(NewRecord::chat("neo", "b"), at(0.0));
        let c = l.append(NewRecord::chat("neo", "c"), at(1.0));
        assert!(a.id < b.id && b.id < c.id);
        assert_eq!(vec![a, b, c], l.read_all());
    }

    #[test]
    fn read_since_is_exactly_greater_than_cursor() {
        let l = log();
        let mut all = Vec::new();
        for i in 0..20 {
            all.push(l.append(
                NewRecord::chat("neo", format!("{i}")),
                at(i as f64 / 4.0),
            ));
        }

        // every possible cursor position, plus before and after
        let mut cursors = vec![RecordId::ZERO];
        cursors.extend(all.iter().map(|r| r.id));
        cursors.push(RecordId::from_timestamp(at(100.0)));

        for cursor in cursors {
            let expect = all
                .iter()
                .filter(|r| r.id > cursor)
                .cloned()
                .collect::<Vec<_>>();
            assert_eq!(expect, l.read_since(cursor), "cursor {cursor}");
        }
    }

    #[test]
    fn cursor_from_clock_catches_records_after_it() {
        let l = log();
        let old = l.append(NewRecord::chat("neo", "old"), at(0.0));
        let cursor = RecordId::from_timestamp(at(0.5));
        let new = l.append(NewRecord::chat("neo", "new"), at(0.6));

        let got = l.read_since(cursor);
        assert_eq!(vec![new], got);
        assert!(!got.contains(&old));
    }

    #[test]
    fn prune_only_drops_records_past_the_window() {
        let l = log();
        l.append(NewRecord::chat("neo", "a"), at(0.0));
        l.append(NewRecord::chat("neo", "b"), at(10.0));
        let c = l.append(NewRecord::chat("neo", "c"), at(20.0));

        // at t=30, "a" is exactly one window old
        assert_eq!(1, l.prune_older_than(Duration::from_secs(30), at(30.0)));
        assert_eq!(2, l.len());

        assert_eq!(0, l.prune_older_than(Duration::from_secs(30), at(30.0)));

        // at t=45, "b" is older than the window, "c" is not
        assert_eq!(1, l.prune_older_than(Duration::from_secs(30), at(45.0)));
        assert_eq!(vec![c], l.read_all());
    }

    #[test]
    fn append_all_keeps_order() {
        let l = log();
        let out = l.append_all(
            vec![NewRecord::left_timeout("a"), NewRecord::left_timeout("b")],
            at(0.0),
        );
        assert_eq!(2, out.len());
        assert!(out[0].id < out[1].id);
        assert_eq!(out, l.read_all());
        assert!(l.append_all(Vec::new(), at(0.0)).is_empty());
    }

    #[test]
    fn reopen_preserves_order() {
        let dir = tempfile::tempdir().unwrap();

        let l = AppendLog::open(Some(dir.path()));
        let a = l.append(NewRecord::chat("neo", "a"), at(0.0));
        let b = l.append(NewRecord::chat("neo", "b"), at(0.0));
        drop(l);

        let l = AppendLog::open(Some(dir.path()));
        assert_eq!(vec![a.clone(), b], l.read_all());

        // the new generator starts from the clock, not the old sequence,
        // but a later clock still orders after what was loaded
        let c = l.append(NewRecord::chat("neo", "c"), at(1.0));
        assert!(c.id > a.id);
    }
}
