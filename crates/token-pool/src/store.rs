//! Disk persistence for token records
//!
//! One JSON file maps app ids to their last known `TokenRecord`. The file is
//! read whole on every load and rewritten whole on every save, using a
//! temp-file + rename so a crash mid-write never leaves a torn file. A tokio
//! Mutex serializes saves so concurrent batches never interleave.
//!
//! Reads are forgiving: a missing, empty or malformed file is an empty map.
//! Only genuine I/O failures surface as errors.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::record::TokenRecord;

/// File-backed token store.
pub struct DiskStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl DiskStore {
    /// Create a store backed by `path`. Nothing touches the disk until the
    /// first load or save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the record persisted for `app_id`.
    ///
    /// Returns `NotFound` when the file has no entry for it, including when
    /// the file does not exist yet.
    pub async fn load(&self, app_id: &str) -> Result<TokenRecord> {
        let mut records = self.load_all().await?;
        records
            .remove(app_id)
            .ok_or_else(|| Error::NotFound(format!("no persisted token for {app_id}")))
    }

    /// Read the whole file into a map.
    pub async fn load_all(&self) -> Result<HashMap<String, TokenRecord>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "token file not found, treating as empty");
                return Ok(HashMap::new());
            }
            Err(e) => return Err(Error::Io(format!("reading token file: {e}"))),
        };

        if contents.trim().is_empty() {
            return Ok(HashMap::new());
        }

        match serde_json::from_str(&contents) {
            Ok(records) => Ok(records),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "token file is malformed, treating as empty");
                Ok(HashMap::new())
            }
        }
    }

    /// Merge `records` into the file, keeping entries not in the batch.
    ///
    /// Records without an app id are skipped.
    pub async fn save(&self, records: &[TokenRecord]) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut all = self.load_all().await?;
        for record in records.iter().filter(|r| !r.app_id.is_empty()) {
            all.insert(record.app_id.clone(), record.clone());
        }

        write_atomic(&self.path, &all).await?;
        debug!(path = %self.path.display(), saved = records.len(), total = all.len(), "persisted tokens");
        Ok(())
    }
}

/// Write the token map to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. The temp file is created with mode 0600 (owner read/write
/// only) since it contains access tokens, and is removed again if any step
/// fails.
async fn write_atomic(path: &Path, data: &HashMap<String, TokenRecord>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Parse(format!("serializing tokens: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("token file path has no parent directory".into()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "tokens".into());

    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    // A leftover temp file would keep its old mode; start from a fresh one
    match tokio::fs::remove_file(&tmp_path).await {
        Ok(()) => debug!(path = %tmp_path.display(), "removed stale temp token file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(Error::Io(format!("removing stale temp token file: {e}"))),
    }

    let written = write_then_rename(&tmp_path, path, json.as_bytes()).await;
    if written.is_err() {
        if let Err(e) = tokio::fs::remove_file(&tmp_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %tmp_path.display(), error = %e, "could not remove temp token file");
            }
        }
    }
    written
}

async fn write_then_rename(tmp_path: &Path, path: &Path, contents: &[u8]) -> Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options
        .open(tmp_path)
        .await
        .map_err(|e| Error::Io(format!("creating temp token file: {e}")))?;
    file.write_all(contents)
        .await
        .map_err(|e| Error::Io(format!("writing temp token file: {e}")))?;
    file.sync_all()
        .await
        .map_err(|e| Error::Io(format!("syncing temp token file: {e}")))?;
    drop(file);

    tokio::fs::rename(tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp token file: {e}")))
}
