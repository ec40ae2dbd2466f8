// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! A filesystem-backed [SnapshotStore]: one JSON file per saved snapshot,
//! per module, under a configured state directory.
//!
//! The wire format departs slightly from a fully flat `[name, value, …]`
//! array: splitting a module path from its trailing values in a flat JSON
//! array requires knowing each parameter's arity, which in turn requires
//! walking the live module tree — exactly the kind of schema awareness the
//! "file I/O is out of scope" framing keeps out of this crate. Instead each
//! non-comment element is itself a two-element `[path, values]` pair, which
//! is unambiguous without consulting the module tree. See `DESIGN.md` for
//! the recorded rationale.

use crate::traits::{SnapshotStore, StateEntry};
use std::path::{Path, PathBuf};

/// An entry in the saved JSON array: either a human-readable comment or a
/// `[path, values]` pair.
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
enum Entry {
    Comment(String),
    Data(Vec<String>, Vec<crate::value::Value>),
}

/// Saves/loads snapshots as one JSON file per `(module_path, name)` under
/// `root`. Save is atomic from the caller's viewpoint (write to a sibling
/// temp file, then rename); load is all-or-nothing, since a parse failure
/// returns an error before any in-memory state is touched.
pub struct FsSnapshotStore {
    root: PathBuf,
}

impl FsSnapshotStore {
    /// Stores snapshots under `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// The conventional per-platform application-data directory this crate
    /// defaults to when no explicit `state_directory` is configured.
    pub fn default_root() -> anyhow::Result<PathBuf> {
        use app_dirs2::{AppDataType, AppInfo};
        const APP_INFO: AppInfo = AppInfo {
            name: "cuehub",
            author: "cuehub",
        };
        Ok(app_dirs2::get_app_root(AppDataType::UserData, &APP_INFO)?)
    }

    fn file_path(&self, module_path: &[String], name: &str) -> PathBuf {
        let mut path = self.root.clone();
        for segment in module_path {
            path.push(segment);
        }
        path.push(format!("{name}.json"));
        path
    }
}

impl SnapshotStore for FsSnapshotStore {
    fn load(&self, module_path: &[String], name: &str) -> anyhow::Result<Vec<StateEntry>> {
        let path = self.file_path(module_path, name);
        let text = std::fs::read_to_string(&path)
            .map_err(|err| anyhow::anyhow!("reading snapshot {}: {err}", path.display()))?;
        let raw: Vec<Entry> = serde_json::from_str(&text)
            .map_err(|err| anyhow::anyhow!("parsing snapshot {}: {err}", path.display()))?;
        Ok(raw
            .into_iter()
            .filter_map(|entry| match entry {
                Entry::Comment(_) => None,
                Entry::Data(path, values) => Some(StateEntry { path, values }),
            })
            .collect())
    }

    fn save(&self, module_path: &[String], name: &str, entries: &[StateEntry]) -> anyhow::Result<()> {
        let path = self.file_path(module_path, name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw: Vec<Entry> = entries
            .iter()
            .map(|e| Entry::Data(e.path.clone(), e.values.clone()))
            .collect();
        let text = serde_json::to_string_pretty(&raw)?;
        atomic_write(&path, text.as_bytes())
    }
}

/// Writes `contents` to `path` by first writing a sibling temp file, then
/// renaming over the destination, so a reader never observes a
/// partially-written file.
fn atomic_write(path: &Path, contents: &[u8]) -> anyhow::Result<()> {
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, contents)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn round_trips_entries_including_submodule_paths() {
        let dir = std::env::temp_dir().join(format!("cuehub-snapshot-test-{}", std::process::id()));
        let store = FsSnapshotStore::new(&dir).unwrap();
        let entries = vec![
            StateEntry {
                path: vec!["a".to_string()],
                values: vec![Value::Int(1)],
            },
            StateEntry {
                path: vec!["sub".to_string(), "c".to_string()],
                values: vec![Value::Double(0.1), Value::Double(0.2)],
            },
        ];
        store.save(&["mod".to_string()], "snap", &entries).unwrap();
        let loaded = store.load(&["mod".to_string()], "snap").unwrap();
        assert_eq!(loaded, entries);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_snapshot_is_an_error_not_a_panic() {
        let dir = std::env::temp_dir().join(format!("cuehub-snapshot-missing-{}", std::process::id()));
        let store = FsSnapshotStore::new(&dir).unwrap();
        assert!(store.load(&["mod".to_string()], "nope").is_err());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn comments_are_ignored_on_load() {
        let dir = std::env::temp_dir().join(format!("cuehub-snapshot-comment-{}", std::process::id()));
        std::fs::create_dir_all(dir.join("mod")).unwrap();
        std::fs::write(
            dir.join("mod").join("snap.json"),
            r#"["a saved preset", [["x"], [1]]]"#,
        )
        .unwrap();
        let store = FsSnapshotStore::new(&dir).unwrap();
        let loaded = store.load(&["mod".to_string()], "snap").unwrap();
        assert_eq!(
            loaded,
            vec![StateEntry {
                path: vec!["x".to_string()],
                values: vec![Value::Int(1)],
            }]
        );
        std::fs::remove_dir_all(&dir).ok();
    }
}
