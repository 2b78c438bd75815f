//! Binary descriptor store: an ordered sequence of (name, descriptor) records.

use crate::StoreError;
use rollcall_core::{Descriptor, DescriptorRecord};
use std::path::{Path, PathBuf};

/// File-backed store of enrolled descriptors.
///
/// Records stay in enrollment order; a name may own several records (one per
/// enrollment). Name is identity — two people who enroll under the same name
/// are indistinguishable, and removal deletes every record under the name.
pub struct DescriptorStore {
    path: PathBuf,
    records: Vec<DescriptorRecord>,
}

impl DescriptorStore {
    /// Open the store, loading the descriptor file if it exists.
    ///
    /// A missing file is the bootstrap state, not an error: the store starts
    /// empty and the file appears on the first save.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let records = match std::fs::read(&path) {
            Ok(bytes) => {
                let (records, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;
                records
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(path = %path.display(), records = records.len(), "descriptor store opened");
        Ok(Self { path, records })
    }

    pub fn records(&self) -> &[DescriptorRecord] {
        &self.records
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.iter().any(|r| r.name == name)
    }

    /// Append one (name, descriptor) record and persist.
    pub fn append(&mut self, name: &str, descriptor: Descriptor) -> Result<(), StoreError> {
        self.records.push(DescriptorRecord {
            name: name.to_string(),
            descriptor,
        });
        self.save()
    }

    /// Remove every record under `name`, returning how many were deleted.
    /// Persists only when something was removed.
    pub fn remove_all(&mut self, name: &str) -> Result<usize, StoreError> {
        let before = self.records.len();
        self.records.retain(|r| r.name != name);
        let removed = before - self.records.len();
        if removed > 0 {
            self.save()?;
        }
        Ok(removed)
    }

    /// Replace the whole store contents and persist (used by re-encoding).
    pub fn replace(&mut self, records: Vec<DescriptorRecord>) -> Result<(), StoreError> {
        self.records = records;
        self.save()
    }

    /// Overwrite the descriptor file via a temp file + rename.
    fn save(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let bytes = bincode::serde::encode_to_vec(&self.records, bincode::config::standard())?;
        let tmp = tmp_path(&self.path);
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(values: &[f32]) -> Descriptor {
        Descriptor { values: values.to_vec() }
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = DescriptorStore::open(dir.path().join("descriptors.bin")).unwrap();
        assert!(store.records().is_empty());
    }

    #[test]
    fn test_append_and_reload_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("descriptors.bin");

        let mut store = DescriptorStore::open(&path).unwrap();
        store.append("alice", descriptor(&[1.0, 0.0])).unwrap();
        store.append("bob", descriptor(&[0.0, 1.0])).unwrap();
        store.append("alice", descriptor(&[0.9, 0.1])).unwrap();

        let reloaded = DescriptorStore::open(&path).unwrap();
        let names: Vec<&str> = reloaded.records().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["alice", "bob", "alice"]);
        assert_eq!(reloaded.records()[1].descriptor.values, vec![0.0, 1.0]);
    }

    #[test]
    fn test_remove_all_deletes_every_record_for_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("descriptors.bin");

        let mut store = DescriptorStore::open(&path).unwrap();
        store.append("alice", descriptor(&[1.0])).unwrap();
        store.append("bob", descriptor(&[2.0])).unwrap();
        store.append("alice", descriptor(&[3.0])).unwrap();

        assert_eq!(store.remove_all("alice").unwrap(), 2);
        assert_eq!(store.records().len(), 1);
        assert_eq!(store.records()[0].name, "bob");

        let reloaded = DescriptorStore::open(&path).unwrap();
        assert_eq!(reloaded.records().len(), 1);
    }

    #[test]
    fn test_remove_all_unknown_name_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("descriptors.bin");

        let mut store = DescriptorStore::open(&path).unwrap();
        store.append("alice", descriptor(&[1.0])).unwrap();
        assert_eq!(store.remove_all("carol").unwrap(), 0);
        assert_eq!(store.records().len(), 1);
    }

    #[test]
    fn test_replace_overwrites_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("descriptors.bin");

        let mut store = DescriptorStore::open(&path).unwrap();
        store.append("alice", descriptor(&[1.0])).unwrap();

        store
            .replace(vec![DescriptorRecord {
                name: "bob".into(),
                descriptor: descriptor(&[2.0]),
            }])
            .unwrap();

        let reloaded = DescriptorStore::open(&path).unwrap();
        assert_eq!(reloaded.records().len(), 1);
        assert_eq!(reloaded.records()[0].name, "bob");
    }

    #[test]
    fn test_contains() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DescriptorStore::open(dir.path().join("d.bin")).unwrap();
        store.append("alice", descriptor(&[1.0])).unwrap();
        assert!(store.contains("alice"));
        assert!(!store.contains("bob"));
    }
}
