//! Single-file project snapshots.
//!
//! # Format
//! A versioned JSON record holding the project directory and every row:
//! ```text
//! {
//!   "version": 1,
//!   "directory": "runs/kinases",
//!   "columns": ["uid", "description", "id", "label", "sequence", "type", "parent", "branch_length"],
//!   "rows": [ { "uid": "A", "sequence": "MKV", "type": "leaf", ... }, ... ]
//! }
//! ```
//! Paths ending in `.gz` are gzip-compressed.
//!
//! The column list is stored so a reader can refuse a snapshot written for a
//! different table layout instead of silently misreading it.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ProjectError, Result};
use crate::io::{create_writer, open_reader};
use crate::table::{COLUMNS, Record, Table};

pub const SNAPSHOT_VERSION: u32 = 1;

/// Conventional snapshot name inside a project directory.
pub const SNAPSHOT_FILE_NAME: &str = "project.json";

/// The persisted state of a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub version: u32,
    pub directory: PathBuf,
    pub columns: Vec<String>,
    pub rows: Vec<Record>,
}

impl ProjectSnapshot {
    pub fn new(directory: &Path, table: &Table) -> Self {
        ProjectSnapshot {
            version: SNAPSHOT_VERSION,
            directory: directory.to_path_buf(),
            columns: COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows: table.records().to_vec(),
        }
    }

    /// Write to `path`, replacing any existing file.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut out = create_writer(path.as_ref())?;
        serde_json::to_writer(&mut out, self)
            .map_err(|e| ProjectError::Io(std::io::Error::other(e)))?;
        writeln!(&mut out)?;
        out.flush()?;
        Ok(())
    }

    /// Read and validate a snapshot.
    ///
    /// A missing file is an I/O error; anything unreadable after that is a
    /// corrupt snapshot.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let p = path.as_ref();
        let reader = open_reader(p)?;
        let snapshot: ProjectSnapshot =
            serde_json::from_reader(reader).map_err(|e| ProjectError::corrupt_snapshot(p, e.to_string()))?;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(ProjectError::corrupt_snapshot(
                p,
                format!(
                    "unsupported version {} (expected {SNAPSHOT_VERSION})",
                    snapshot.version
                ),
            ));
        }
        if snapshot.columns.iter().map(String::as_str).ne(COLUMNS) {
            return Err(ProjectError::corrupt_snapshot(
                p,
                format!("unexpected columns [{}]", snapshot.columns.join(", ")),
            ));
        }
        Ok(snapshot)
    }

    pub fn into_parts(self) -> (PathBuf, Table) {
        (self.directory, Table::from_records(self.rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::NodeType;
    use std::fs;

    fn sample_table() -> Table {
        Table::from_records(vec![
            Record {
                description: Some("kinase".into()),
                id: Some("A".into()),
                sequence: Some("MKV".into()),
                node_type: Some(NodeType::Leaf),
                parent: Some("r".into()),
                branch_length: Some(0.1),
                ..Record::new("A")
            },
            Record {
                label: Some("100".into()),
                node_type: Some(NodeType::Root),
                ..Record::new("r")
            },
        ])
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["snap.json", "snap.json.gz"] {
            let path = dir.path().join(name);
            let snapshot = ProjectSnapshot::new(Path::new("runs/one"), &sample_table());
            snapshot.write(&path).unwrap();
            assert_eq!(ProjectSnapshot::read(&path).unwrap(), snapshot);
        }
    }

    #[test]
    fn test_branch_lengths_survive_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.json");
        let lengths = [1.5958653677963763e-7, 0.1 + 0.2, 1.0 / 3.0, 97.50000000000001, f64::MIN_POSITIVE];
        let table: Table = lengths
            .iter()
            .enumerate()
            .map(|(i, &length)| Record {
                branch_length: Some(length),
                ..Record::new(format!("n{i}"))
            })
            .collect();

        ProjectSnapshot::new(Path::new("p"), &table).write(&path).unwrap();
        let (_, restored) = ProjectSnapshot::read(&path).unwrap().into_parts();
        let restored: Vec<u64> = restored
            .iter()
            .map(|r| r.branch_length.unwrap().to_bits())
            .collect();
        let expected: Vec<u64> = lengths.iter().map(|l| l.to_bits()).collect();
        assert_eq!(restored, expected);
    }

    #[test]
    fn test_garbage_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.json");
        fs::write(&path, "not json at all").unwrap();
        assert!(matches!(
            ProjectSnapshot::read(&path),
            Err(ProjectError::CorruptSnapshot { .. })
        ));
    }

    #[test]
    fn test_unknown_version_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.json");
        let mut snapshot = ProjectSnapshot::new(Path::new("p"), &Table::new());
        snapshot.version = 7;
        snapshot.write(&path).unwrap();
        let err = ProjectSnapshot::read(&path).unwrap_err();
        assert!(err.to_string().contains("unsupported version 7"));
    }

    #[test]
    fn test_column_mismatch_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.json");
        let mut snapshot = ProjectSnapshot::new(Path::new("p"), &Table::new());
        snapshot.columns.pop();
        snapshot.write(&path).unwrap();
        assert!(matches!(
            ProjectSnapshot::read(&path),
            Err(ProjectError::CorruptSnapshot { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ProjectSnapshot::read(dir.path().join("absent.json")),
            Err(ProjectError::Io(_))
        ));
    }
}
