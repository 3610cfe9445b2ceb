//! Append-only JSONL journal.
//!
//! One JSON record per line. Used for the reflection log and the commit
//! journal.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CycleError, Result};
use crate::util::{read_to_string_with_limit, MAX_FILE_SIZE};

/// Appends serialized records to a JSONL file.
#[derive(Debug, Clone)]
pub struct JsonlJournal {
    path: PathBuf,
}

impl JsonlJournal {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Append one record.
    pub fn append<T: Serialize>(&self, record: &T) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| CycleError::storage(parent, e))?;
            }
        }

        let json = serde_json::to_string(record)
            .map_err(|e| CycleError::serde(format!("Failed to serialize journal record: {}", e)))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| CycleError::storage(&self.path, e))?;

        writeln!(file, "{}", json).map_err(|e| CycleError::storage(&self.path, e))
    }

    /// Read every record, oldest first.
    pub fn read_all<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = read_to_string_with_limit(&self.path, MAX_FILE_SIZE)?;

        let mut records = Vec::new();
        for (line_num, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(line).map_err(|e| {
                CycleError::serde(format!(
                    "Failed to parse {} line {}: {}",
                    self.path.display(),
                    line_num + 1,
                    e
                ))
            })?;
            records.push(record);
        }

        Ok(records)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Entry {
        n: u32,
    }

    #[test]
    fn test_append_and_read_back_in_order() {
        let dir = TempDir::new().unwrap();
        let journal = JsonlJournal::new(dir.path().join("nested/log.jsonl"));

        journal.append(&Entry { n: 1 }).unwrap();
        journal.append(&Entry { n: 2 }).unwrap();

        let entries: Vec<Entry> = journal.read_all().unwrap();
        assert_eq!(entries, vec![Entry { n: 1 }, Entry { n: 2 }]);
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        let journal = JsonlJournal::new(dir.path().join("none.jsonl"));
        let entries: Vec<Entry> = journal.read_all().unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_corrupt_line_reports_line_number() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.jsonl");
        fs::write(&path, "{\"n\":1}\nnot json\n").unwrap();

        let err = JsonlJournal::new(&path).read_all::<Entry>().unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}
