//! File-backed set of blocked sender ids.
//!
//! The file is the source of truth. The in-memory copy is refreshed lazily:
//! every lookup compares the file's modification time with the cached one and
//! reloads when it moved. Every mutation rewrites the whole file.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, Result};

/// Read side used by the eligibility filter
pub trait BlockCheck: Send + Sync {
    fn is_blocked(&self, sender_id: &str) -> bool;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Filters {
    #[serde(default)]
    blocked_vlive_ids: Vec<String>,
}

/// On-disk layout. The flat `{"blocked_vlive_ids": [...]}` form is accepted
/// on read and upgraded on the next write.
#[derive(Debug, Default, Serialize, Deserialize)]
struct BlocklistFile {
    #[serde(default)]
    filters: Filters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    blocked_vlive_ids: Option<Vec<String>>,
    #[serde(default = "default_comments")]
    comments: Value,
}

fn default_comments() -> Value {
    serde_json::json!({
        "description": "Comments from these vlive ids are never answered",
        "usage": "Add ids with /block <id>, remove them with /unblock <id>"
    })
}

#[derive(Debug, Default)]
struct Inner {
    blocked: BTreeSet<String>,
    loaded_mtime: Option<SystemTime>,
    comments: Option<Value>,
}

#[derive(Debug)]
pub struct Blocklist {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl Blocklist {
    /// Open the blocklist at `path`, creating an empty file if none exists
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let list = Self {
            path: path.into(),
            inner: Mutex::new(Inner::default()),
        };

        {
            let mut inner = list.inner.lock();
            if list.path.exists() {
                list.load_locked(&mut inner)?;
            } else {
                list.write_locked(&mut inner)?;
                tracing::info!("Created blocklist at {}", list.path.display());
            }
        }

        Ok(list)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `sender_id` is blocked, reloading first if the file changed
    pub fn contains(&self, sender_id: &str) -> bool {
        let mut inner = self.inner.lock();
        self.refresh_locked(&mut inner);
        inner.blocked.contains(sender_id)
    }

    /// Block a sender id. Returns false if it was already blocked.
    pub fn block(&self, sender_id: &str) -> Result<bool> {
        let sender_id = sender_id.trim();
        if sender_id.is_empty() {
            return Ok(false);
        }
        let mut inner = self.inner.lock();
        self.refresh_locked(&mut inner);
        if !inner.blocked.insert(sender_id.to_string()) {
            return Ok(false);
        }
        self.write_locked(&mut inner)?;
        tracing::info!("Blocked sender {}", sender_id);
        Ok(true)
    }

    /// Unblock a sender id. Returns false if it was not blocked.
    pub fn unblock(&self, sender_id: &str) -> Result<bool> {
        let mut inner = self.inner.lock();
        self.refresh_locked(&mut inner);
        if !inner.blocked.remove(sender_id.trim()) {
            return Ok(false);
        }
        self.write_locked(&mut inner)?;
        tracing::info!("Unblocked sender {}", sender_id.trim());
        Ok(true)
    }

    /// All blocked ids in sorted order
    pub fn list(&self) -> Vec<String> {
        let mut inner = self.inner.lock();
        self.refresh_locked(&mut inner);
        inner.blocked.iter().cloned().collect()
    }

    /// Remove every entry
    pub fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.blocked.clear();
        self.write_locked(&mut inner)
    }

    /// Force a reload from disk regardless of modification time
    pub fn reload(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        self.load_locked(&mut inner)
    }

    fn file_mtime(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok()
    }

    fn refresh_locked(&self, inner: &mut Inner) {
        let Some(mtime) = self.file_mtime() else {
            return;
        };
        if inner.loaded_mtime.is_some_and(|loaded| mtime <= loaded) {
            return;
        }
        // Keep serving the previous set if the file is mid-write or corrupt
        if let Err(e) = self.load_locked(inner) {
            tracing::warn!("Blocklist reload failed: {}", e);
        }
    }

    fn load_locked(&self, inner: &mut Inner) -> Result<()> {
        let path = self.path.display().to_string();
        let content =
            std::fs::read_to_string(&self.path).map_err(|e| CoreError::blocklist_io(&path, e))?;
        let file: BlocklistFile =
            serde_json::from_str(&content).map_err(|e| CoreError::blocklist_io(&path, e))?;

        let mut ids = file.filters.blocked_vlive_ids;
        ids.extend(file.blocked_vlive_ids.unwrap_or_default());

        inner.blocked = ids
            .into_iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();
        inner.comments = Some(file.comments);
        inner.loaded_mtime = self.file_mtime();

        tracing::debug!("Loaded {} blocked ids from {}", inner.blocked.len(), path);
        Ok(())
    }

    fn write_locked(&self, inner: &mut Inner) -> Result<()> {
        let path = self.path.display().to_string();
        let file = BlocklistFile {
            filters: Filters {
                blocked_vlive_ids: inner.blocked.iter().cloned().collect(),
            },
            blocked_vlive_ids: None,
            comments: inner.comments.clone().unwrap_or_else(default_comments),
        };
        let content = serde_json::to_string_pretty(&file).map_err(|e| {
            CoreError::SerializationError {
                data_type: "blocklist".to_string(),
                cause: e,
            }
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::blocklist_io(&path, e))?;
        }
        std::fs::write(&self.path, content).map_err(|e| CoreError::blocklist_io(&path, e))?;
        inner.loaded_mtime = self.file_mtime();
        Ok(())
    }
}

impl BlockCheck for Blocklist {
    fn is_blocked(&self, sender_id: &str) -> bool {
        self.contains(sender_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filter_list.json");
        let list = Blocklist::open(&path).unwrap();

        assert!(path.exists());
        assert!(list.list().is_empty());

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["filters"]["blocked_vlive_ids"], serde_json::json!([]));
    }

    #[test]
    fn test_block_unblock_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filter_list.json");
        let list = Blocklist::open(&path).unwrap();

        assert!(list.block("v123").unwrap());
        assert!(!list.block("v123").unwrap());
        assert!(list.is_blocked("v123"));

        let reopened = Blocklist::open(&path).unwrap();
        assert_eq!(reopened.list(), vec!["v123".to_string()]);

        assert!(reopened.unblock("v123").unwrap());
        assert!(!reopened.unblock("v123").unwrap());
        assert!(!reopened.is_blocked("v123"));
    }

    #[test]
    fn test_reads_flat_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filter_list.json");
        std::fs::write(&path, r#"{"blocked_vlive_ids": ["a", " b ", ""]}"#).unwrap();

        let list = Blocklist::open(&path).unwrap();
        assert_eq!(list.list(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_reload_picks_up_external_edit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filter_list.json");
        let list = Blocklist::open(&path).unwrap();
        assert!(!list.is_blocked("ext"));

        std::fs::write(&path, r#"{"filters": {"blocked_vlive_ids": ["ext"]}}"#).unwrap();
        list.reload().unwrap();
        assert!(list.is_blocked("ext"));
    }

    #[test]
    fn test_lookup_notices_external_edit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filter_list.json");
        let list = Blocklist::open(&path).unwrap();
        assert!(!list.is_blocked("ext"));

        std::fs::write(&path, r#"{"filters": {"blocked_vlive_ids": ["ext"]}}"#).unwrap();
        // Coarse filesystem clocks may not move the mtime on their own
        let file = std::fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() + std::time::Duration::from_secs(5))
            .unwrap();
        drop(file);

        assert!(list.is_blocked("ext"));
        assert_eq!(list.list(), vec!["ext".to_string()]);
    }

    #[test]
    fn test_lookup_keeps_previous_set_on_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filter_list.json");
        let list = Blocklist::open(&path).unwrap();
        list.block("kept").unwrap();

        std::fs::write(&path, "{ half written").unwrap();
        let file = std::fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() + std::time::Duration::from_secs(5))
            .unwrap();
        drop(file);

        assert!(list.is_blocked("kept"));
    }

    #[test]
    fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let list = Blocklist::open(dir.path().join("f.json")).unwrap();
        list.block("x").unwrap();
        list.block("y").unwrap();
        list.clear().unwrap();
        assert!(list.list().is_empty());
    }
}
