//! Long-running transfer records.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::SystemTime;

use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{FilesError, Result};

/// Length in bytes of the random operation id.
const ID_BYTES: usize = 16;

/// Whether the source is kept after a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// Keep the source.
    Copy,
    /// Remove the source once the destination is in place.
    Move,
}

impl TransferKind {
    /// Lowercase name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferKind::Copy => "copy",
            TransferKind::Move => "move",
        }
    }
}

/// Lifecycle state of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    /// Still transferring.
    Running,
    /// Every file reached its destination.
    Completed,
    /// Stopped on an error, carrying its message.
    Failed(String),
    /// Stopped by [`TransferOperation::cancel`].
    Cancelled,
}

impl TransferStatus {
    /// True once the background task has stopped.
    pub fn is_finished(&self) -> bool {
        !matches!(self, TransferStatus::Running)
    }
}

/// A copy or move running in the background.
///
/// Shared between the caller and the task that performs the transfer. Only
/// the task advances progress and status.
pub struct TransferOperation {
    id: String,
    kind: TransferKind,
    source: PathBuf,
    destination: PathBuf,
    temp_path: Option<PathBuf>,
    created_at: SystemTime,
    current_size: AtomicU64,
    total_size: u64,
    status: watch::Sender<TransferStatus>,
    task: Mutex<Option<JoinHandle<Result<()>>>>,
    cancel: CancellationToken,
}

impl TransferOperation {
    pub(crate) fn new(
        kind: TransferKind,
        source: PathBuf,
        destination: PathBuf,
        temp_path: Option<PathBuf>,
        total_size: u64,
    ) -> Self {
        let (status, _) = watch::channel(TransferStatus::Running);

        Self {
            id: generate_id(),
            kind,
            source,
            destination,
            temp_path,
            created_at: SystemTime::now(),
            current_size: AtomicU64::new(0),
            total_size,
            status,
            task: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Opaque random identifier (32 hex characters).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Copy or move.
    pub fn kind(&self) -> TransferKind {
        self.kind
    }

    /// Normalized source path.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Normalized destination path.
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Staging path of a single-file transfer.
    pub fn temp_path(&self) -> Option<&Path> {
        self.temp_path.as_deref()
    }

    /// When the operation was accepted.
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Bytes of files already in place at the destination.
    pub fn current_size(&self) -> u64 {
        self.current_size.load(Ordering::Acquire)
    }

    /// Bytes to transfer, measured when the operation was created.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Current lifecycle state.
    pub fn status(&self) -> TransferStatus {
        self.status.borrow().clone()
    }

    /// Request cancellation. Units that have not started yet are skipped.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// True once cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for the transfer to finish.
    ///
    /// The first caller receives the task's own error. Later callers of a
    /// failed operation receive [`FilesError::TransferFailed`].
    pub async fn wait(&self) -> Result<()> {
        let handle = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        if let Some(handle) = handle {
            return match handle.await {
                Ok(result) => result,
                Err(e) => {
                    let err = FilesError::from(e);
                    self.status
                        .send_replace(TransferStatus::Failed(err.to_string()));
                    Err(err)
                }
            };
        }

        let mut status = self.status.subscribe();
        let finished = status
            .wait_for(TransferStatus::is_finished)
            .await
            .map_err(|_| FilesError::TransferFailed("operation state was dropped".to_string()))?
            .clone();

        match finished {
            TransferStatus::Completed => Ok(()),
            TransferStatus::Cancelled => Err(FilesError::Cancelled),
            TransferStatus::Failed(message) => Err(FilesError::TransferFailed(message)),
            TransferStatus::Running => Err(FilesError::TransferFailed(
                "operation did not finish".to_string(),
            )),
        }
    }

    pub(crate) fn attach(&self, handle: JoinHandle<Result<()>>) {
        *self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);
    }

    pub(crate) fn add_progress(&self, bytes: u64) {
        self.current_size.fetch_add(bytes, Ordering::AcqRel);
    }

    pub(crate) fn finish(&self, result: &Result<()>) {
        let status = match result {
            Ok(()) => TransferStatus::Completed,
            Err(FilesError::Cancelled) => TransferStatus::Cancelled,
            Err(e) => TransferStatus::Failed(e.to_string()),
        };
        self.status.send_replace(status);
    }
}

impl std::fmt::Debug for TransferOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferOperation")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("source", &self.source)
            .field("destination", &self.destination)
            .field("current_size", &self.current_size())
            .field("total_size", &self.total_size)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

fn generate_id() -> String {
    let mut bytes = [0u8; ID_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
