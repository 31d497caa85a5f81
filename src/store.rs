//! Per-user session files on the server side.
//!
//! Layout: `<root>/<user>/<device>_<start_ts>.json`, one file per upload.
//! When two uploads map onto the same name the later one gets `_1`, `_2`, …
//! before the extension; a stored file is never overwritten.
//! Every path component comes from the client, so each is checked against
//! `[A-Za-z0-9._-]` with no leading dot before it touches the filesystem.

use std::path::{Path, PathBuf};

use log::{debug, info};
use tokio::io::AsyncWriteExt;

use crate::error::StoreError;
use crate::upload::UploadPayload;

fn allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

/// Accept `s` as a path component or reject it.
pub fn validate_component(s: &str) -> Result<&str, StoreError> {
    if s.is_empty() || s.starts_with('.') || !s.chars().all(allowed) {
        return Err(StoreError::UnsafePathComponent(s.to_string()));
    }
    Ok(s)
}

/// Map `s` onto the allowed set, replacing anything else with `_`.
///
/// ```
/// # use muse_recorder::store::sanitize_component;
/// assert_eq!(sanitize_component("../Muse 2/AB"), "_._Muse_2_AB");
/// assert_eq!(sanitize_component(""), "unknown");
/// ```
pub fn sanitize_component(s: &str) -> String {
    let mut out: String = s.chars().map(|c| if allowed(c) { c } else { '_' }).collect();
    if out.starts_with('.') {
        out.replace_range(..1, "_");
    }
    if out.is_empty() {
        out.push_str("unknown");
    }
    out
}

/// Flat-file store rooted at a data directory.
#[derive(Debug, Clone)]
pub struct DataStore {
    root: PathBuf,
}

impl DataStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn user_dir(&self, user: &str) -> Result<PathBuf, StoreError> {
        Ok(self.root.join(validate_component(user)?))
    }

    /// File name a payload is stored under.
    pub fn file_name(payload: &UploadPayload) -> String {
        let start = payload
            .data
            .start_ts
            .map_or_else(|| "nostart".to_string(), |ts| ts.to_string());
        format!("{}_{start}.json", sanitize_component(&payload.device))
    }

    /// Persist `payload` for `user`; returns the new file's id.
    pub async fn save(&self, user: &str, payload: &UploadPayload) -> Result<String, StoreError> {
        let dir = self.user_dir(user)?;
        tokio::fs::create_dir_all(&dir).await?;
        let body = serde_json::to_vec(payload)?;
        let base = Self::file_name(payload);
        let stem = base.trim_end_matches(".json");
        let mut n = 0u32;
        loop {
            let id = match n {
                0 => base.clone(),
                n => format!("{stem}_{n}.json"),
            };
            let path = dir.join(&id);
            let mut file = match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    debug!("{} taken", path.display());
                    n += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let written = async {
                file.write_all(&body).await?;
                file.flush().await
            };
            if let Err(e) = written.await {
                let _ = tokio::fs::remove_file(&path).await;
                return Err(e.into());
            }
            info!("saved {}", path.display());
            return Ok(id);
        }
    }

    /// Ids stored for `user`, sorted. A user with no uploads has none.
    pub async fn list(&self, user: &str) -> Result<Vec<String>, StoreError> {
        let dir = self.user_dir(user)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };
        let mut ids = vec![];
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    ids.push(name.to_string());
                }
            }
        }
        ids.sort();
        debug!("{user}: {} stored session(s)", ids.len());
        Ok(ids)
    }

    /// Path of one stored session, checked to exist.
    pub async fn open(&self, user: &str, id: &str) -> Result<PathBuf, StoreError> {
        let path = self.user_dir(user)?.join(validate_component(id)?);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            Ok(_) => Err(StoreError::NotFound(id.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{DeviceMetadata, RecordingSession};

    fn payload(device: &str, start_ts: Option<u64>) -> UploadPayload {
        let mut data = RecordingSession::new(DeviceMetadata {
            device: device.into(),
            ..Default::default()
        });
        data.start_ts = start_ts;
        UploadPayload {
            device: device.into(),
            data,
        }
    }

    #[test]
    fn validation_rejects_traversal() {
        for bad in ["", "..", ".hidden", "a/b", "a\\b", "al ice", "x\0"] {
            assert!(validate_component(bad).is_err(), "{bad:?}");
        }
        assert_eq!(validate_component("Muse-1A_2.json").unwrap(), "Muse-1A_2.json");
    }

    #[test]
    fn file_name_uses_device_and_start() {
        assert_eq!(DataStore::file_name(&payload("Muse-1", Some(42))), "Muse-1_42.json");
        assert_eq!(
            DataStore::file_name(&payload("../etc/passwd", None)),
            "_._etc_passwd_nostart.json"
        );
    }

    #[tokio::test]
    async fn save_list_open() {
        let dir = tempfile::tempdir().unwrap();
        let store = DataStore::new(dir.path());
        assert!(store.list("alice").await.unwrap().is_empty());

        let id = store.save("alice", &payload("Muse-B", Some(2))).await.unwrap();
        store.save("alice", &payload("Muse-A", Some(1))).await.unwrap();
        assert_eq!(store.list("alice").await.unwrap(), ["Muse-A_1.json", "Muse-B_2.json"]);
        assert!(store.list("bob").await.unwrap().is_empty());

        let path = store.open("alice", &id).await.unwrap();
        let stored: UploadPayload = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(stored.data.start_ts, Some(2));

        assert!(matches!(
            store.open("bob", &id).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.open("alice", "../bob").await,
            Err(StoreError::UnsafePathComponent(_))
        ));
        assert!(matches!(
            store.save("../alice", &payload("Muse-A", None)).await,
            Err(StoreError::UnsafePathComponent(_))
        ));
    }

    #[tokio::test]
    async fn colliding_names_get_distinct_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = DataStore::new(dir.path());

        let first = store.save("alice", &payload("Muse (A)", Some(1000))).await.unwrap();
        let second = store.save("alice", &payload("Muse [A]", Some(1000))).await.unwrap();
        let third = store.save("alice", &payload("Muse (A)", Some(1000))).await.unwrap();
        assert_eq!(first, "Muse__A__1000.json");
        assert_eq!(second, "Muse__A__1000_1.json");
        assert_eq!(third, "Muse__A__1000_2.json");
        assert_eq!(
            store.list("alice").await.unwrap(),
            [first.clone(), second.clone(), third.clone()]
        );

        let read = |id: &str| {
            let path = dir.path().join("alice").join(id);
            serde_json::from_slice::<UploadPayload>(&std::fs::read(path).unwrap()).unwrap()
        };
        assert_eq!(read(&first).device, "Muse (A)");
        assert_eq!(read(&second).device, "Muse [A]");
    }
}
