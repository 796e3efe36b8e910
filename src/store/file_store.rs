//! Filesystem-backed page store.
//!
//! The store owns the on-disk namespace under its root. The directory tree is
//! also the dedup index: an identifier is "downloaded" when its encoded path
//! names a regular file, whether that file holds a finished page or the
//! [`PLACEHOLDER`] written when a fetch was dispatched.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashSet;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncWriteExt, BufWriter};
use tracing::{debug, instrument};

use super::codec::{Identifier, decode, encode};
use super::error::StoreError;
use crate::fetch::DownloadLedger;

/// Content written to a path the moment its identifier is dispatched.
///
/// A file holding exactly this content (or nothing at all) is an
/// interrupted download, never a finished one.
pub const PLACEHOLDER: &[u8] = b"tmp";

/// Suffix of the hidden sibling file a save streams into before renaming.
const PARTIAL_SUFFIX: &str = ".part";

/// Outcome of claiming an identifier with a placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The placeholder was created by this call.
    Claimed,
    /// A file already existed at the encoded path; nothing was written.
    AlreadyPresent,
}

/// Result of a successful [`FileStore::save`].
#[derive(Debug, Clone)]
pub struct SavedFile {
    /// Final location of the page.
    pub path: PathBuf,
    /// Number of bytes written.
    pub bytes: u64,
}

/// Content read back by [`FileStore::read_stale`].
#[derive(Debug, Clone)]
pub struct StaleRead {
    /// Location the content was read from.
    pub path: PathBuf,
    /// Whether the content marks an incomplete download.
    pub stale: bool,
    /// The raw file content.
    pub content: Vec<u8>,
}

/// Returns true if `content` is empty or exactly the placeholder.
#[must_use]
pub fn is_stale_content(content: &[u8]) -> bool {
    content.is_empty() || content == PLACEHOLDER
}

/// Returns true for the hidden temporary files written by [`FileStore::save`].
#[must_use]
pub fn is_partial_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.') && name.ends_with(PARTIAL_SUFFIX))
}

/// Page store rooted at the mirror output directory.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    /// Identifiers whose placeholder was written by this process.
    claimed: DashSet<Identifier>,
}

impl FileStore {
    /// Creates a store rooted at `root`. The directory is not touched.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            claimed: DashSet::new(),
        }
    }

    /// The store root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of `id` under the root.
    #[must_use]
    pub fn path_for(&self, id: &Identifier) -> PathBuf {
        self.root.join(encode(id))
    }

    /// Returns true if the encoded path of `id` is a regular file.
    pub async fn exists(&self, id: &Identifier) -> bool {
        tokio::fs::metadata(self.path_for(id))
            .await
            .is_ok_and(|meta| meta.is_file())
    }

    /// Whether this process claimed `id` with a placeholder.
    #[must_use]
    pub fn claimed_by_this_run(&self, id: &Identifier) -> bool {
        self.claimed.contains(id)
    }

    /// Whether `partial` is the temporary file of a save this process may
    /// still be writing.
    #[must_use]
    pub fn partial_in_progress(&self, partial: &Path) -> bool {
        let Some(name) = partial
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.strip_prefix('.'))
            .and_then(|name| name.strip_suffix(PARTIAL_SUFFIX))
        else {
            return false;
        };
        decode(&partial.with_file_name(name), &self.root)
            .is_ok_and(|id| self.claimed_by_this_run(&id))
    }

    /// Atomically claims `id` by creating its file with the placeholder.
    ///
    /// Creation is exclusive, so of several concurrent claims for the same
    /// identifier exactly one returns [`Claim::Claimed`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DirectoryCreateFailed`] or
    /// [`StoreError::WriteFailed`]; an existing file is not an error.
    #[instrument(level = "debug", skip(self), fields(id = %id))]
    pub async fn write_placeholder(&self, id: &Identifier) -> Result<Claim, StoreError> {
        let path = self.path_for(id);
        ensure_parent(&path).await?;

        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                debug!(path = %path.display(), "placeholder target already present");
                return Ok(Claim::AlreadyPresent);
            }
            Err(e) => return Err(StoreError::write(path, e)),
        };

        self.claimed.insert(id.clone());
        file.write_all(PLACEHOLDER)
            .await
            .map_err(|e| StoreError::write(&path, e))?;
        file.flush().await.map_err(|e| StoreError::write(&path, e))?;
        Ok(Claim::Claimed)
    }

    /// Streams `reader` into the file for `id`, replacing any existing content.
    ///
    /// Content is written to a hidden partial file next to the target and
    /// renamed into place, so readers observe either the old content (for
    /// example the placeholder) or the complete page.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DirectoryCreateFailed`] or
    /// [`StoreError::WriteFailed`].
    #[instrument(level = "debug", skip(self, reader), fields(id = %id))]
    pub async fn save<R>(&self, id: &Identifier, reader: R) -> Result<SavedFile, StoreError>
    where
        R: AsyncRead + Unpin,
    {
        let path = self.path_for(id);
        ensure_parent(&path).await?;

        let partial = partial_path(&path);
        let bytes = match write_partial(&partial, reader).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(StoreError::write(partial, e));
            }
        };

        if let Err(e) = tokio::fs::rename(&partial, &path).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(StoreError::write(path, e));
        }

        debug!(path = %path.display(), bytes, "page written");
        Ok(SavedFile { path, bytes })
    }

    /// Reads the stored content of `id` and classifies it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ReadFailed`] if the file cannot be read.
    pub async fn read_stale(&self, id: &Identifier) -> Result<StaleRead, StoreError> {
        let path = self.path_for(id);
        let content = tokio::fs::read(&path)
            .await
            .map_err(|e| StoreError::read(&path, e))?;
        Ok(StaleRead {
            stale: is_stale_content(&content),
            path,
            content,
        })
    }

    /// Removes the stored file of `id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RemoveFailed`]; a missing file is not an error.
    pub async fn remove(&self, id: &Identifier) -> Result<(), StoreError> {
        self.remove_path(&self.path_for(id)).await
    }

    /// Removes an arbitrary file under the root (used for leftover partials).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RemoveFailed`]; a missing file is not an error.
    pub async fn remove_path(&self, path: &Path) -> Result<(), StoreError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::remove(path, e)),
        }
    }
}

#[async_trait]
impl DownloadLedger for FileStore {
    async fn already_downloaded(&self, id: &Identifier) -> bool {
        self.exists(id).await
    }

    async fn on_dispatch(&self, id: &Identifier) -> Result<Claim, StoreError> {
        self.write_placeholder(id).await
    }
}

async fn ensure_parent(path: &Path) -> Result<(), StoreError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| StoreError::directory_create(parent, e))
}

fn partial_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}{PARTIAL_SUFFIX}"))
}

async fn write_partial<R>(partial: &Path, mut reader: R) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    let file = File::create(partial).await?;
    let mut writer = BufWriter::new(file);
    let bytes = tokio::io::copy(&mut reader, &mut writer).await?;
    writer.flush().await?;
    writer.into_inner().sync_all().await?;
    Ok(bytes)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::*;

    fn id(raw: &str) -> Identifier {
        Identifier::parse(raw).unwrap()
    }

    #[test]
    fn test_is_stale_content() {
        assert!(is_stale_content(b""));
        assert!(is_stale_content(PLACEHOLDER));
        assert!(!is_stale_content(b"tmp\n"));
        assert!(!is_stale_content(b"<html></html>"));
    }

    #[test]
    fn test_is_partial_file() {
        assert!(is_partial_file(Path::new("/m/example.com/.a.html.part")));
        assert!(!is_partial_file(Path::new("/m/example.com/a.html")));
        assert!(!is_partial_file(Path::new("/m/example.com/a.html.part")));
    }

    #[tokio::test]
    async fn test_partial_in_progress_only_for_own_claims() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        let mine = id("example.com/wiki/Mine");
        store.write_placeholder(&mine).await.unwrap();

        assert!(store.partial_in_progress(&dir.path().join("example.com/wiki/.Mine.html.part")));
        assert!(!store.partial_in_progress(&dir.path().join("example.com/wiki/.Old.html.part")));
        assert!(!store.partial_in_progress(&dir.path().join("example.com/wiki/Mine.html")));
    }

    #[tokio::test]
    async fn test_placeholder_claims_once() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        let page = id("example.com/wiki/A");

        assert!(!store.exists(&page).await);
        assert_eq!(store.write_placeholder(&page).await.unwrap(), Claim::Claimed);
        assert!(store.exists(&page).await);
        assert!(store.claimed_by_this_run(&page));
        assert_eq!(
            store.write_placeholder(&page).await.unwrap(),
            Claim::AlreadyPresent
        );

        let content = std::fs::read(dir.path().join("example.com/wiki/A.html")).unwrap();
        assert_eq!(content, PLACEHOLDER);
    }

    #[tokio::test]
    async fn test_concurrent_placeholder_claims_have_one_winner() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileStore::new(dir.path()));
        let page = id("example.com/contended");

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            let page = page.clone();
            handles.push(tokio::spawn(async move {
                store.write_placeholder(&page).await.unwrap()
            }));
        }

        let mut claimed = 0;
        for handle in handles {
            if handle.await.unwrap() == Claim::Claimed {
                claimed += 1;
            }
        }
        assert_eq!(claimed, 1);
    }

    #[tokio::test]
    async fn test_save_overwrites_placeholder() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        let page = id("https://example.com/a/");

        store.write_placeholder(&page).await.unwrap();
        let saved = store
            .save(&page, &b"<html><body>A</body></html>"[..])
            .await
            .unwrap();

        assert_eq!(saved.path, dir.path().join("example.com/a.html"));
        assert_eq!(saved.bytes, 27);
        let read = store.read_stale(&page).await.unwrap();
        assert!(!read.stale);
        assert_eq!(read.content, b"<html><body>A</body></html>");
        assert!(!dir.path().join("example.com/.a.html.part").exists());
    }

    #[tokio::test]
    async fn test_read_stale_detects_placeholder_and_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());

        let placeholder = id("example.com/p");
        store.write_placeholder(&placeholder).await.unwrap();
        assert!(store.read_stale(&placeholder).await.unwrap().stale);

        let empty = id("example.com/e");
        store.save(&empty, &b""[..]).await.unwrap();
        assert!(store.read_stale(&empty).await.unwrap().stale);
    }

    #[tokio::test]
    async fn test_read_missing_file_errors() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        let err = store.read_stale(&id("example.com/none")).await.unwrap_err();
        assert!(matches!(err, StoreError::ReadFailed { .. }));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        let page = id("example.com/r");

        store.write_placeholder(&page).await.unwrap();
        store.remove(&page).await.unwrap();
        assert!(!store.exists(&page).await);
        store.remove(&page).await.unwrap();
    }

    #[tokio::test]
    async fn test_save_reports_directory_failure() {
        let dir = TempDir::new().unwrap();
        // A regular file where the host directory should go.
        std::fs::write(dir.path().join("example.com"), b"not a dir").unwrap();
        let store = FileStore::new(dir.path());

        let err = store
            .save(&id("example.com/a"), &b"content"[..])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DirectoryCreateFailed { .. }));
    }

    #[tokio::test]
    async fn test_ledger_hooks_delegate_to_store() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        let page = id("example.com/ledger");

        assert!(!store.already_downloaded(&page).await);
        assert_eq!(store.on_dispatch(&page).await.unwrap(), Claim::Claimed);
        assert!(store.already_downloaded(&page).await);
    }
}
