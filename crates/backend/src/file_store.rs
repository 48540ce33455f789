//! JSON file storage for refresh tokens and key ids
//!
//! One file maps session names to their persisted record. All writes use
//! atomic temp-file + rename so a crash mid-write never leaves a truncated
//! file. A tokio Mutex serializes writers; readers clone out of the in-memory
//! map.

use std::collections::HashMap;
use std::ffi::OsString;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{BackendError, Result};
use crate::{KeyKind, KeyStore, TokenStore};

/// Everything persisted for one named session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anonymous_key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub biometric_key_id: Option<String>,
}

impl StoredSession {
    pub(crate) fn key_id(&self, kind: KeyKind) -> Option<&String> {
        match kind {
            KeyKind::Anonymous => self.anonymous_key_id.as_ref(),
            KeyKind::Biometric => self.biometric_key_id.as_ref(),
        }
    }

    pub(crate) fn key_id_mut(&mut self, kind: KeyKind) -> &mut Option<String> {
        match kind {
            KeyKind::Anonymous => &mut self.anonymous_key_id,
            KeyKind::Biometric => &mut self.biometric_key_id,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.refresh_token.is_none()
            && self.anonymous_key_id.is_none()
            && self.biometric_key_id.is_none()
    }
}

/// File-backed `TokenStore` + `KeyStore`.
pub struct FileStore {
    path: PathBuf,
    state: Mutex<HashMap<String, StoredSession>>,
}

impl FileStore {
    /// Load the store from the given file path.
    ///
    /// A missing file is created as `{}` so later loads skip the cold-start
    /// path.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let sessions = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let sessions: HashMap<String, StoredSession> = serde_json::from_str(&contents)
                    .map_err(|e| storage_error("parsing", &path, e))?;
                info!(path = %path.display(), sessions = sessions.len(), "loaded session store");
                sessions
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no session store yet, creating one");
                let empty = HashMap::new();
                write_atomic(&path, &empty).await?;
                empty
            }
            Err(e) => return Err(storage_error("reading", &path, e)),
        };

        Ok(Self {
            path,
            state: Mutex::new(sessions),
        })
    }

    /// Snapshot of one session's record.
    pub async fn record(&self, name: &str) -> Option<StoredSession> {
        self.state.lock().await.get(name).cloned()
    }

    /// Apply `update` to a session's record and persist.
    ///
    /// Records that end up empty are dropped from the file entirely.
    async fn update<F>(&self, name: &str, update: F) -> Result<()>
    where
        F: FnOnce(&mut StoredSession),
    {
        let mut state = self.state.lock().await;
        let mut record = state.remove(name).unwrap_or_default();
        update(&mut record);
        if !record.is_empty() {
            state.insert(name.to_string(), record);
        }
        write_atomic(&self.path, &state).await
    }
}

impl TokenStore for FileStore {
    fn get<'a>(
        &'a self,
        name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>>> + Send + 'a>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state.get(name).and_then(|r| r.refresh_token.clone()))
        })
    }

    fn set<'a>(
        &'a self,
        name: &'a str,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            debug!(session = name, "storing refresh token");
            self.update(name, |r| r.refresh_token = Some(refresh_token.to_string()))
                .await
        })
    }

    fn delete<'a>(&'a self, name: &'a str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            debug!(session = name, "deleting refresh token");
            self.update(name, |r| r.refresh_token = None).await
        })
    }
}

impl KeyStore for FileStore {
    fn get_key_id<'a>(
        &'a self,
        name: &'a str,
        kind: KeyKind,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>>> + Send + 'a>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state.get(name).and_then(|r| r.key_id(kind).cloned()))
        })
    }

    fn set_key_id<'a>(
        &'a self,
        name: &'a str,
        kind: KeyKind,
        key_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            debug!(session = name, ?kind, "storing key id");
            self.update(name, |r| *r.key_id_mut(kind) = Some(key_id.to_string()))
                .await
        })
    }

    fn delete_key_id<'a>(
        &'a self,
        name: &'a str,
        kind: KeyKind,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            debug!(session = name, ?kind, "deleting key id");
            self.update(name, |r| *r.key_id_mut(kind) = None).await
        })
    }
}

fn storage_error(action: &str, path: &Path, error: impl std::fmt::Display) -> BackendError {
    BackendError::Storage(format!("{action} {}: {error}", path.display()))
}

/// Sibling temp file for one write to `path`.
///
/// Named after the target and unique per write, so stores sharing a
/// directory (or a file) never write through the same temp file.
fn temp_path(path: &Path) -> Result<PathBuf> {
    static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

    let file_name = path
        .file_name()
        .ok_or_else(|| storage_error("resolving", path, "path has no file name"))?;
    let seq = WRITE_SEQ.fetch_add(1, Ordering::Relaxed);
    let mut name = OsString::from(".");
    name.push(file_name);
    name.push(format!(".tmp.{}.{seq}", std::process::id()));
    Ok(path.with_file_name(name))
}

/// Replace `path` with the serialized store: write a 0600 sibling temp file,
/// then rename it over the target.
async fn write_atomic(path: &Path, data: &HashMap<String, StoredSession>) -> Result<()> {
    let json = serde_json::to_vec_pretty(data).map_err(|e| storage_error("serializing", path, e))?;
    let tmp = temp_path(path)?;

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let written = async {
        let mut file = options.open(&tmp).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        tokio::fs::rename(&tmp, path).await
    }
    .await;
    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(storage_error("writing", path, e));
    }

    debug!(path = %path.display(), bytes = json.len(), "persisted session store");
    Ok(())
}
