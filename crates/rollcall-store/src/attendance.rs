//! Append-only attendance log with the same-day-once rule.

use crate::{roster::write_csv, StoreError};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One attendance mark. At most one entry exists per (name, date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceEntry {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Date")]
    pub date: NaiveDate,
    #[serde(rename = "Time")]
    pub time: NaiveTime,
}

/// Outcome of a mark attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    /// A new entry was written.
    Marked,
    /// An entry already existed for this name today; nothing was written.
    AlreadyMarked,
}

/// CSV-backed attendance log with columns `Name,Date,Time`.
///
/// The check-then-append in [`mark`](Self::mark) is unsynchronized; the tool
/// is single-process and foreground-driven, so no second writer exists.
pub struct AttendanceLog {
    path: PathBuf,
    entries: Vec<AttendanceEntry>,
}

impl AttendanceLog {
    /// Open the log; a missing file loads as an empty log.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = if path.exists() {
            let mut reader = csv::Reader::from_path(&path)?;
            reader.deserialize().collect::<Result<Vec<_>, _>>()?
        } else {
            Vec::new()
        };

        tracing::debug!(path = %path.display(), entries = entries.len(), "attendance log opened");
        Ok(Self { path, entries })
    }

    pub fn entries(&self) -> &[AttendanceEntry] {
        &self.entries
    }

    /// Mark `name` present on `date` unless already marked that day.
    ///
    /// The clock is supplied by the caller so tests can simulate dates.
    pub fn mark(&mut self, name: &str, date: NaiveDate, time: NaiveTime) -> Result<MarkOutcome, StoreError> {
        if self.entries.iter().any(|e| e.name == name && e.date == date) {
            return Ok(MarkOutcome::AlreadyMarked);
        }

        self.entries.push(AttendanceEntry {
            name: name.to_string(),
            date,
            time,
        });
        write_csv(&self.path, &self.entries)?;
        Ok(MarkOutcome::Marked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    fn time(hour: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, 0, 0).unwrap()
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = AttendanceLog::open(dir.path().join("attendance.csv")).unwrap();
        assert!(log.entries().is_empty());
    }

    #[test]
    fn test_same_day_marks_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = AttendanceLog::open(dir.path().join("attendance.csv")).unwrap();

        assert_eq!(log.mark("alice", date(1), time(9)).unwrap(), MarkOutcome::Marked);
        assert_eq!(log.mark("alice", date(1), time(10)).unwrap(), MarkOutcome::AlreadyMarked);
        assert_eq!(log.entries().len(), 1);
        assert_eq!(log.entries()[0].time, time(9));
    }

    #[test]
    fn test_different_days_mark_twice() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = AttendanceLog::open(dir.path().join("attendance.csv")).unwrap();

        assert_eq!(log.mark("alice", date(1), time(9)).unwrap(), MarkOutcome::Marked);
        assert_eq!(log.mark("alice", date(2), time(9)).unwrap(), MarkOutcome::Marked);
        assert_eq!(log.entries().len(), 2);
    }

    #[test]
    fn test_same_day_different_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = AttendanceLog::open(dir.path().join("attendance.csv")).unwrap();

        assert_eq!(log.mark("alice", date(1), time(9)).unwrap(), MarkOutcome::Marked);
        assert_eq!(log.mark("bob", date(1), time(9)).unwrap(), MarkOutcome::Marked);
        assert_eq!(log.entries().len(), 2);
    }

    #[test]
    fn test_rule_holds_across_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.csv");

        let mut log = AttendanceLog::open(&path).unwrap();
        log.mark("alice", date(1), time(9)).unwrap();
        drop(log);

        let mut reloaded = AttendanceLog::open(&path).unwrap();
        assert_eq!(
            reloaded.mark("alice", date(1), time(11)).unwrap(),
            MarkOutcome::AlreadyMarked
        );
        assert_eq!(reloaded.entries().len(), 1);
    }

    #[test]
    fn test_csv_header_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.csv");
        let mut log = AttendanceLog::open(&path).unwrap();
        log.mark("alice", date(1), time(9)).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("Name,Date,Time"));
    }
}
