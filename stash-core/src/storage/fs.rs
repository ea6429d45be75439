use super::{Metadata, Storage, ensure_not_root};
use crate::content::Content;
use crate::error::{Result, StashError};
use crate::key::Key;
use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use futures_util::stream;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use ulid::Ulid;

/// Staging directory for in-flight writes, relative to the storage root.
/// It is reserved: keys under it are never listed.
pub const STAGING_DIR: &str = ".tmp";

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Storage mapping keys onto files below a root directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_path(&self, key: &Key) -> Result<PathBuf> {
        if key.parts().iter().any(|part| part == "." || part == "..") {
            return Err(StashError::InvalidKey(format!(
                "entry path is out of storage: {}",
                key
            )));
        }
        Ok(key
            .parts()
            .iter()
            .fold(self.root.clone(), |path, part| path.join(part)))
    }

    fn path_key(&self, path: &Path) -> Result<Key> {
        let relative = path.strip_prefix(&self.root).map_err(|_| {
            StashError::InvalidKey(format!("path {} is out of storage", path.display()))
        })?;
        Key::from_parts(
            relative
                .components()
                .map(|component| component.as_os_str().to_string_lossy().into_owned()),
        )
    }

    fn staging_path(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    async fn file_metadata(&self, key: &Key) -> Result<std::fs::Metadata> {
        let path = self.key_path(key)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(meta),
            Ok(_) => Err(StashError::NotFound(key.clone())),
            Err(e) if is_missing(&e) => Err(StashError::NotFound(key.clone())),
            Err(e) => Err(e.into()),
        }
    }

    /// Entries of `dir`, skipping the staging directory. A missing directory,
    /// or a path running through a file, yields nothing.
    async fn dir_entries(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if is_missing(&e) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let staging = self.staging_path();
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path != staging {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    async fn walk_files(&self, start: Vec<PathBuf>) -> Result<Vec<Key>> {
        let mut keys = Vec::new();
        let mut pending = start;

        while let Some(path) = pending.pop() {
            let meta = match fs::metadata(&path).await {
                Ok(meta) => meta,
                // removed while walking
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if meta.is_file() {
                keys.push(self.path_key(&path)?);
            } else if meta.is_dir() {
                pending.extend(self.dir_entries(&path).await?);
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn prune_empty_dirs(&self, start: Option<&Path>) {
        let mut current = start.map(Path::to_path_buf);
        while let Some(dir) = current {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            if fs::remove_dir(&dir).await.is_err() {
                break;
            }
            current = dir.parent().map(Path::to_path_buf);
        }
    }

    async fn write_staged(&self, staged: &Path, content: Content) -> Result<()> {
        let mut file = fs::File::create(staged).await?;
        let mut chunks = content.into_stream();
        while let Some(chunk) = chunks.try_next().await? {
            file.write_all(&chunk).await?;
        }
        file.sync_all().await?;
        Ok(())
    }
}

/// `a/b` is missing both when `a` does not exist and when `a` is a file.
fn is_missing(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::NotFound | ErrorKind::NotADirectory
    )
}

#[async_trait]
impl Storage for FileStorage {
    async fn exists(&self, key: &Key) -> Result<bool> {
        if key.is_root() {
            return Ok(false);
        }
        match self.file_metadata(key).await {
            Ok(_) => Ok(true),
            Err(StashError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn list(&self, prefix: &Key) -> Result<Vec<Key>> {
        let start = match (prefix.parent(), prefix.parts().last()) {
            (Some(parent), Some(last)) => {
                let dir = self.key_path(&parent)?;
                self.dir_entries(&dir)
                    .await?
                    .into_iter()
                    .filter(|path| {
                        path.file_name()
                            .map(|name| name.to_string_lossy().starts_with(last.as_str()))
                            .unwrap_or(false)
                    })
                    .collect()
            }
            _ => self.dir_entries(&self.root).await?,
        };

        let keys = self.walk_files(start).await?;
        tracing::debug!(
            "Found {} keys by prefix '{}' in {}",
            keys.len(),
            prefix,
            self.root.display()
        );
        Ok(keys)
    }

    async fn save(&self, key: &Key, content: Content) -> Result<()> {
        ensure_not_root(key, "save to")?;
        let path = self.key_path(key)?;

        // Write to a staged file first, then rename for atomicity
        let staging = self.staging_path();
        fs::create_dir_all(&staging).await?;
        let staged = staging.join(format!("{}.tmp", Ulid::new()));

        let written = match self.write_staged(&staged, content).await {
            Ok(()) => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).await?;
                }
                fs::rename(&staged, &path).await.map_err(StashError::from)
            }
            Err(e) => Err(e),
        };

        if written.is_err() {
            let _ = fs::remove_file(&staged).await;
        }
        written
    }

    async fn move_key(&self, source: &Key, destination: &Key) -> Result<()> {
        ensure_not_root(destination, "move to")?;
        self.file_metadata(source).await?;
        let from = self.key_path(source)?;
        let to = self.key_path(destination)?;

        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&from, &to).await?;
        self.prune_empty_dirs(from.parent()).await;
        Ok(())
    }

    async fn value(&self, key: &Key) -> Result<Content> {
        ensure_not_root(key, "load from")?;
        let meta = self.file_metadata(key).await?;
        let file = match fs::File::open(self.key_path(key)?).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StashError::NotFound(key.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        let chunks = stream::try_unfold(file, |mut file| async move {
            let mut buf = BytesMut::with_capacity(READ_CHUNK_SIZE);
            let read = file.read_buf(&mut buf).await?;
            let next: Result<_> = if read == 0 {
                Ok(None)
            } else {
                Ok(Some((buf.freeze(), file)))
            };
            next
        });
        Ok(Content::from_stream(chunks, Some(meta.len())))
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        self.file_metadata(key).await?;
        let path = self.key_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StashError::NotFound(key.clone()));
            }
            Err(e) => return Err(e.into()),
        }
        self.prune_empty_dirs(path.parent()).await;
        Ok(())
    }

    async fn metadata(&self, key: &Key) -> Result<Metadata> {
        let meta = self.file_metadata(key).await?;
        Ok(Metadata {
            size: meta.len(),
            last_modified: meta.modified().ok().map(DateTime::<Utc>::from),
        })
    }

    fn identifier(&self) -> String {
        format!("FS: {}", self.root.display())
    }
}
