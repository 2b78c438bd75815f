//! Roster of registered people, persisted as a two-column CSV file.

use crate::StoreError;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One registered person. Created on enrollment, deleted on removal,
/// never otherwise mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonRecord {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "RegisteredOn")]
    pub registered_on: NaiveDateTime,
}

/// CSV-backed roster with columns `Name,RegisteredOn`.
pub struct Roster {
    path: PathBuf,
    records: Vec<PersonRecord>,
}

impl Roster {
    /// Open the roster; a missing file loads as an empty roster.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let records = if path.exists() {
            let mut reader = csv::Reader::from_path(&path)?;
            reader.deserialize().collect::<Result<Vec<_>, _>>()?
        } else {
            Vec::new()
        };

        tracing::debug!(path = %path.display(), records = records.len(), "roster opened");
        Ok(Self { path, records })
    }

    pub fn records(&self) -> &[PersonRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.iter().any(|r| r.name == name)
    }

    /// Add a person and persist.
    pub fn add(&mut self, name: &str, registered_on: NaiveDateTime) -> Result<(), StoreError> {
        self.records.push(PersonRecord {
            name: name.to_string(),
            registered_on,
        });
        self.save()
    }

    /// Remove every record under `name`, returning how many were deleted.
    pub fn remove(&mut self, name: &str) -> Result<usize, StoreError> {
        let before = self.records.len();
        self.records.retain(|r| r.name != name);
        let removed = before - self.records.len();
        if removed > 0 {
            self.save()?;
        }
        Ok(removed)
    }

    fn save(&self) -> Result<(), StoreError> {
        write_csv(&self.path, &self.records)
    }
}

/// Overwrite a CSV file via a temp file + rename.
pub(crate) fn write_csv<T: Serialize>(path: &Path, records: &[T]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut writer = csv::Writer::from_path(&tmp)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    drop(writer);

    std::fs::rename(&tmp, path)?;
    Ok(())
}
