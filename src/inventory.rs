//! Scanning the log root for the files that can be tailed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Snapshot of one log file, taken during a scan.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct FileRecord {
    /// Channel name: the path relative to the log root, `/`-separated.
    #[serde(skip)]
    path: String,
    #[serde(rename = "mtime")]
    modified: DateTime<Local>,
    size: u64,
}

impl FileRecord {
    pub fn modified(&self) -> DateTime<Local> {
        self.modified
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Every file beneath the log root, keyed by channel name.
///
/// Serializes as a JSON object of `{"mtime": ..., "size": ...}` records.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Inventory {
    files: BTreeMap<String, FileRecord>,
}

impl Inventory {
    pub fn get(&self, channel: &str) -> Option<&FileRecord> {
        self.files.get(channel)
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.files.contains_key(channel)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn insert(&mut self, record: FileRecord) {
        self.files.insert(record.path.clone(), record);
    }
}

/// Walks `root` and records every regular file beneath it.
///
/// Only a failure to traverse the root itself is reported; entries that
/// vanish or cannot be read mid-walk are skipped.
pub fn scan(root: impl AsRef<Path>) -> Result<Inventory> {
    let root = root.as_ref();
    let mut inventory = Inventory::default();

    for entry in WalkDir::new(root).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.depth() == 0 => {
                return Err(Error::Inventory {
                    root: root.to_path_buf(),
                    source: err,
                })
            }
            Err(err) => {
                debug!("skipping unreadable entry: {}", err);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                debug!("skipping {}: {}", entry.path().display(), err);
                continue;
            }
        };
        let modified = match metadata.modified() {
            Ok(modified) => DateTime::<Local>::from(modified),
            Err(err) => {
                debug!("skipping {}: {}", entry.path().display(), err);
                continue;
            }
        };

        let path = channel_name(root, entry.path());
        debug!("found logfile {}", path);
        inventory.insert(FileRecord {
            path,
            modified,
            size: metadata.len(),
        });
    }

    Ok(inventory)
}

/// Resolves a channel name to a file beneath `root`, rejecting names that
/// would escape it.
pub fn resolve(root: impl AsRef<Path>, channel: &str) -> Option<PathBuf> {
    use std::path::Component;

    let relative = Path::new(channel);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return None;
    }

    Some(root.as_ref().join(relative))
}

fn channel_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_scan_nested_tree() {
        let root = tempdir().unwrap();
        fs::write(root.path().join("app.log"), b"hello\n").unwrap();
        fs::create_dir_all(root.path().join("nginx/old")).unwrap();
        fs::write(root.path().join("nginx/access.log"), b"GET /\nGET /x\n").unwrap();
        fs::write(root.path().join("nginx/old/access.log.1"), b"").unwrap();

        let inventory = scan(root.path()).unwrap();

        assert_eq!(inventory.len(), 3);
        assert_eq!(inventory.get("app.log").unwrap().size(), 6);
        assert_eq!(inventory.get("nginx/access.log").unwrap().size(), 13);
        assert_eq!(inventory.get("nginx/old/access.log.1").unwrap().size(), 0);
        // Directories themselves are not channels
        assert!(!inventory.contains("nginx"));
        assert!(!inventory.contains("nginx/old"));
    }

    #[test]
    fn test_scan_records_mtime() {
        let root = tempdir().unwrap();
        let path = root.path().join("app.log");
        fs::write(&path, b"x\n").unwrap();
        let expected = DateTime::<Local>::from(fs::metadata(&path).unwrap().modified().unwrap());

        let inventory = scan(root.path()).unwrap();

        assert_eq!(inventory.get("app.log").unwrap().modified(), expected);
    }

    #[test]
    fn test_scan_empty_tree() {
        let root = tempdir().unwrap();
        fs::create_dir(root.path().join("empty")).unwrap();

        let inventory = scan(root.path()).unwrap();
        assert!(inventory.is_empty());
    }

    #[test]
    fn test_scan_missing_root() {
        let root = tempdir().unwrap();
        let missing = root.path().join("nope");

        assert!(matches!(scan(&missing), Err(Error::Inventory { .. })));
    }

    #[test]
    fn test_scan_idempotent() {
        let root = tempdir().unwrap();
        fs::write(root.path().join("a.log"), b"a\n").unwrap();
        fs::write(root.path().join("b.log"), b"bb\n").unwrap();

        assert_eq!(scan(root.path()).unwrap(), scan(root.path()).unwrap());
    }

    #[test]
    fn test_serialize_shape() {
        let root = tempdir().unwrap();
        fs::write(root.path().join("a.log"), b"abc").unwrap();

        let json = serde_json::to_value(scan(root.path()).unwrap()).unwrap();
        let record = &json["a.log"];
        assert_eq!(record["size"], 3);
        assert!(record["mtime"].is_string());
        assert!(record.get("path").is_none());
    }

    #[test]
    fn test_resolve() {
        let root = Path::new("/var/log");
        assert_eq!(
            resolve(root, "nginx/access.log"),
            Some(PathBuf::from("/var/log/nginx/access.log"))
        );
        assert_eq!(resolve(root, "../etc/passwd"), None);
        assert_eq!(resolve(root, "/etc/passwd"), None);
    }
}
