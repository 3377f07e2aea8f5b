//! Filesystem backends.
//!
//! Layout under the configured root:
//!
//! ```text
//! tables/{table}/{partition}/{row}.json
//! blobs/{container}/{name}
//! ```
//!
//! Key segments are percent-encoded. Writes go to a temporary file that is
//! renamed into place, so readers never see a half-written record. Lock
//! records use `create_new` opens, which fail if the file exists; processes
//! sharing the root therefore exclude each other.
//!
//! Upserts read, merge and rewrite a record. Within a process they are
//! serialized per record path so concurrent merges of different properties
//! all land.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, PoisonError};

use hubcal_core::BoxFuture;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::blob::BlobStore;
use crate::error::{StoreError, StoreResult};
use crate::table::{InsertOutcome, Properties, TableEntity, TableStore};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

static RECORD_LOCKS: LazyLock<std::sync::Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> =
    LazyLock::new(Default::default);

fn record_lock(path: &Path) -> Arc<Mutex<()>> {
    let mut locks = RECORD_LOCKS.lock().unwrap_or_else(PoisonError::into_inner);
    locks.entry(path.to_path_buf()).or_default().clone()
}

fn segment(key: &str) -> StoreResult<String> {
    if key.is_empty() || key == "." || key == ".." {
        return Err(StoreError::invalid_key(key));
    }
    Ok(urlencoding::encode(key).into_owned())
}

fn temp_path(path: &Path) -> PathBuf {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".tmp-{}-{n}", std::process::id()));
    path.with_file_name(name)
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let temp = temp_path(path);
    fs::write(&temp, bytes).await?;
    if let Err(e) = fs::rename(&temp, path).await {
        let _ = fs::remove_file(&temp).await;
        return Err(e.into());
    }
    Ok(())
}

async fn read_optional(path: &Path) -> StoreResult<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn parse_properties(bytes: &[u8]) -> StoreResult<Properties> {
    // A record created by insert_if_absent is empty until its body lands.
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Properties::new());
    }
    Ok(serde_json::from_slice(bytes)?)
}

/// Table store keeping one JSON file per record.
#[derive(Debug, Clone)]
pub struct FsTableStore {
    root: PathBuf,
}

impl FsTableStore {
    /// Creates a store rooted at `root`. Directories are created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn partition_dir(&self, table: &str, partition: &str) -> StoreResult<PathBuf> {
        Ok(self
            .root
            .join("tables")
            .join(segment(table)?)
            .join(segment(partition)?))
    }

    fn record_path(&self, table: &str, partition: &str, row: &str) -> StoreResult<PathBuf> {
        Ok(self
            .partition_dir(table, partition)?
            .join(format!("{}.json", segment(row)?)))
    }
}

impl TableStore for FsTableStore {
    fn upsert(&self, table: &str, entity: TableEntity) -> BoxFuture<'_, StoreResult<()>> {
        let path = self.record_path(table, &entity.partition, &entity.row);
        Box::pin(async move {
            let path = path?;
            let lock = record_lock(&path);
            let _guard = lock.lock().await;
            let mut properties = match read_optional(&path).await? {
                Some(bytes) => parse_properties(&bytes)?,
                None => Properties::new(),
            };
            properties.extend(entity.properties);
            let bytes = serde_json::to_vec_pretty(&properties)?;
            write_atomic(&path, &bytes).await?;
            trace!(path = %path.display(), "upserted record");
            Ok(())
        })
    }

    fn get(
        &self,
        table: &str,
        partition: &str,
        row: &str,
    ) -> BoxFuture<'_, StoreResult<Option<TableEntity>>> {
        let path = self.record_path(table, partition, row);
        let (partition, row) = (partition.to_string(), row.to_string());
        Box::pin(async move {
            let Some(bytes) = read_optional(&path?).await? else {
                return Ok(None);
            };
            Ok(Some(TableEntity {
                partition,
                row,
                properties: parse_properties(&bytes)?,
            }))
        })
    }

    fn query(&self, table: &str, partition: &str) -> BoxFuture<'_, StoreResult<Vec<TableEntity>>> {
        let dir = self.partition_dir(table, partition);
        let partition = partition.to_string();
        Box::pin(async move {
            let dir = dir?;
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(e.into()),
            };

            let mut rows = Vec::new();
            while let Some(entry) = entries.next_entry().await? {
                let file_name = entry.file_name();
                let Some(stem) = file_name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                    continue;
                };
                let row = match urlencoding::decode(stem) {
                    Ok(row) => row.into_owned(),
                    Err(_) => {
                        debug!(file = %stem, "skipping undecodable record name");
                        continue;
                    }
                };
                let Some(bytes) = read_optional(&entry.path()).await? else {
                    continue;
                };
                rows.push(TableEntity {
                    partition: partition.clone(),
                    row,
                    properties: parse_properties(&bytes)?,
                });
            }
            rows.sort_by(|a, b| a.row.cmp(&b.row));
            Ok(rows)
        })
    }

    fn insert_if_absent(
        &self,
        table: &str,
        entity: TableEntity,
    ) -> BoxFuture<'_, StoreResult<InsertOutcome>> {
        let path = self.record_path(table, &entity.partition, &entity.row);
        Box::pin(async move {
            let path = path?;
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
            let mut file = match OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    trace!(path = %path.display(), "record already exists");
                    return Ok(InsertOutcome::AlreadyExists);
                }
                Err(e) => return Err(e.into()),
            };
            let bytes = serde_json::to_vec_pretty(&entity.properties)?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            Ok(InsertOutcome::Inserted)
        })
    }

    fn delete(&self, table: &str, partition: &str, row: &str) -> BoxFuture<'_, StoreResult<bool>> {
        let path = self.record_path(table, partition, row);
        Box::pin(async move {
            match fs::remove_file(path?).await {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e.into()),
            }
        })
    }
}

/// Blob store keeping one file per blob.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Creates a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn blob_path(&self, container: &str, name: &str) -> StoreResult<PathBuf> {
        Ok(self
            .root
            .join("blobs")
            .join(segment(container)?)
            .join(segment(name)?))
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, container: &str, name: &str, bytes: Vec<u8>) -> BoxFuture<'_, StoreResult<()>> {
        let path = self.blob_path(container, name);
        Box::pin(async move {
            let path = path?;
            write_atomic(&path, &bytes).await?;
            debug!(path = %path.display(), bytes = bytes.len(), "wrote blob");
            Ok(())
        })
    }

    fn get(&self, container: &str, name: &str) -> BoxFuture<'_, StoreResult<Option<Vec<u8>>>> {
        let path = self.blob_path(container, name);
        Box::pin(async move { read_optional(&path?).await })
    }

    fn exists(&self, container: &str, name: &str) -> BoxFuture<'_, StoreResult<bool>> {
        let path = self.blob_path(container, name);
        Box::pin(async move { Ok(fs::try_exists(path?).await?) })
    }
}
