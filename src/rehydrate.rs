//! Concurrent walk of a previously populated output tree.
//!
//! Every subdirectory is scanned by its own Tokio task. An outstanding-subtree
//! counter starts at one for the root, is incremented before each child task
//! is spawned and decremented exactly once when a task exits, whatever path it
//! took out. The decrement that reaches zero sends the single completion
//! signal; nothing polls the counter.
//!
//! # Example
//!
//! ```no_run
//! use mirror_core::rehydrate::Rehydrator;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut walk = Rehydrator::new("./mirror").start(CancellationToken::new()).await?;
//! while let Some(path) = walk.paths.recv().await {
//!     println!("{}", path.display());
//! }
//! let stats = walk.completion.await??;
//! println!("{} files in {} directories", stats.files, stats.directories);
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Capacity of the stored-path channel.
const PATH_BUFFER: usize = 256;

/// Errors that end a rehydration.
#[derive(Debug, Error)]
pub enum RehydrateError {
    /// The resume directory is absent or not a directory.
    #[error("resume directory {path} does not exist or is not a directory")]
    MissingRoot {
        /// The configured root.
        path: PathBuf,
    },

    /// Listing a directory inside the tree failed.
    #[error("failed to read directory {path}: {source}")]
    ReadDir {
        /// Directory that could not be listed.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The walk went away without reporting completion.
    #[error("rehydration ended without signalling completion")]
    Abandoned,
}

/// Totals reported with a successful completion.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RehydrateStats {
    /// Files emitted on the path channel.
    pub files: usize,
    /// Directories listed, including the root.
    pub directories: usize,
}

/// Handles for a running walk.
#[derive(Debug)]
pub struct Rehydration {
    /// Every stored file path. Closes once all subtree tasks have exited.
    pub paths: mpsc::Receiver<PathBuf>,
    /// Resolves exactly once, when the outstanding-subtree count reaches zero.
    pub completion: oneshot::Receiver<Result<RehydrateStats, RehydrateError>>,
}

/// Walks an output tree and emits the path of every stored file.
#[derive(Debug, Clone)]
pub struct Rehydrator {
    root: PathBuf,
}

impl Rehydrator {
    /// Creates a rehydrator for `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Starts the walk.
    ///
    /// Cancelling `cancel` stops further listing and emission; completion is
    /// still signalled once the running tasks exit.
    ///
    /// # Errors
    ///
    /// Returns [`RehydrateError::MissingRoot`] before spawning anything if the
    /// root is not an existing directory.
    #[instrument(skip(self, cancel), fields(root = %self.root.display()))]
    pub async fn start(&self, cancel: CancellationToken) -> Result<Rehydration, RehydrateError> {
        let is_dir = tokio::fs::metadata(&self.root)
            .await
            .is_ok_and(|meta| meta.is_dir());
        if !is_dir {
            return Err(RehydrateError::MissingRoot {
                path: self.root.clone(),
            });
        }

        let (path_tx, path_rx) = mpsc::channel(PATH_BUFFER);
        let (done_tx, done_rx) = oneshot::channel();

        let state = Arc::new(WalkState {
            outstanding: AtomicUsize::new(1),
            files: AtomicUsize::new(0),
            directories: AtomicUsize::new(0),
            first_error: Mutex::new(None),
            completion: Mutex::new(Some(done_tx)),
            cancel: cancel.child_token(),
        });

        debug!("starting rehydration");
        spawn_subtree(state, self.root.clone(), path_tx);

        Ok(Rehydration {
            paths: path_rx,
            completion: done_rx,
        })
    }
}

struct WalkState {
    outstanding: AtomicUsize,
    files: AtomicUsize,
    directories: AtomicUsize,
    first_error: Mutex<Option<RehydrateError>>,
    completion: Mutex<Option<oneshot::Sender<Result<RehydrateStats, RehydrateError>>>>,
    /// Child of the caller's token; also cancelled on the first read failure.
    cancel: CancellationToken,
}

impl WalkState {
    fn fail(&self, error: RehydrateError) {
        warn!(error = %error, "rehydration aborted");
        let mut slot = self
            .first_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(error);
        }
        drop(slot);
        self.cancel.cancel();
    }

    fn complete(&self) {
        let sender = self
            .completion
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(sender) = sender else {
            return;
        };

        let error = self
            .first_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let outcome = match error {
            Some(error) => Err(error),
            None => Ok(RehydrateStats {
                files: self.files.load(Ordering::SeqCst),
                directories: self.directories.load(Ordering::SeqCst),
            }),
        };
        debug!(ok = outcome.is_ok(), "rehydration complete");
        // The receiver may already be gone; nothing else to notify.
        let _ = sender.send(outcome);
    }
}

/// Holds one unit of the outstanding-subtree count.
struct SubtreeGuard {
    state: Arc<WalkState>,
}

impl Drop for SubtreeGuard {
    fn drop(&mut self) {
        if self.state.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.state.complete();
        }
    }
}

/// Spawns the scan of `dir`. The caller must already have counted it.
fn spawn_subtree(state: Arc<WalkState>, dir: PathBuf, path_tx: mpsc::Sender<PathBuf>) {
    let guard = SubtreeGuard {
        state: Arc::clone(&state),
    };
    tokio::spawn(async move {
        let _guard = guard;
        scan_directory(&state, &dir, &path_tx).await;
    });
}

async fn scan_directory(state: &Arc<WalkState>, dir: &Path, path_tx: &mpsc::Sender<PathBuf>) {
    if state.cancel.is_cancelled() {
        return;
    }

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(source) => {
            state.fail(RehydrateError::ReadDir {
                path: dir.to_path_buf(),
                source,
            });
            return;
        }
    };
    state.directories.fetch_add(1, Ordering::SeqCst);

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(source) => {
                state.fail(RehydrateError::ReadDir {
                    path: dir.to_path_buf(),
                    source,
                });
                return;
            }
        };

        let path = entry.path();
        let is_dir = match entry.file_type().await {
            Ok(file_type) => file_type.is_dir(),
            Err(source) => {
                state.fail(RehydrateError::ReadDir {
                    path: dir.to_path_buf(),
                    source,
                });
                return;
            }
        };

        if is_dir {
            state.outstanding.fetch_add(1, Ordering::SeqCst);
            spawn_subtree(Arc::clone(state), path, path_tx.clone());
            continue;
        }

        tokio::select! {
            biased;
            () = state.cancel.cancelled() => return,
            sent = path_tx.send(path) => {
                if sent.is_err() {
                    // Receiver dropped: nobody wants the rest of the walk.
                    return;
                }
            }
        }
        state.files.fetch_add(1, Ordering::SeqCst);
    }
}
