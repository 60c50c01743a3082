//! Copy and move of files and directory trees.
//!
//! Every request is validated up front and then runs on a background task,
//! tracked by a shared [`TransferOperation`]. Directory trees fan out into
//! one unit per subdirectory and one safe transfer per file. A failing file
//! does not stop its siblings; the first error is reported once every unit
//! has finished.

mod operation;
mod safe;

pub use operation::{TransferKind, TransferOperation, TransferStatus};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::access::FileAccess;
use crate::error::{FilesError, Result};
use crate::path;
use crate::provider::{FileProvider, SearchOption};

/// Starts and tracks transfers through a [`FileProvider`].
#[derive(Clone)]
pub struct TransferEngine {
    provider: Arc<FileProvider>,
}

impl TransferEngine {
    /// Create an engine that performs all I/O through `provider`.
    pub fn new(provider: Arc<FileProvider>) -> Self {
        Self { provider }
    }

    /// The gateway every transfer goes through.
    pub fn provider(&self) -> &Arc<FileProvider> {
        &self.provider
    }

    /// Copy a file or directory tree.
    pub async fn copy(&self, source: &Path, destination: &Path) -> Result<Arc<TransferOperation>> {
        self.start(TransferKind::Copy, source, destination).await
    }

    /// Move a file or directory tree.
    pub async fn move_to(
        &self,
        source: &Path,
        destination: &Path,
    ) -> Result<Arc<TransferOperation>> {
        self.start(TransferKind::Move, source, destination).await
    }

    async fn start(
        &self,
        kind: TransferKind,
        source: &Path,
        destination: &Path,
    ) -> Result<Arc<TransferOperation>> {
        let source_access = match kind {
            TransferKind::Copy => FileAccess::Read,
            TransferKind::Move => FileAccess::ReadWrite,
        };
        let source = self.provider.ensure_access(source, source_access)?;
        let destination = self.provider.ensure_access(destination, FileAccess::ReadWrite)?;

        if path::paths_eq_ignore_case(&source, &destination) {
            return Err(FilesError::InvalidOperation(
                "source and destination are the same".to_string(),
            ));
        }

        let source_metadata = tokio::fs::metadata(&source)
            .await
            .map_err(|e| FilesError::from_io(e, &source))?;

        let destination_parent = destination.parent().ok_or_else(|| {
            FilesError::InvalidOperation("destination has no parent directory".to_string())
        })?;
        if !is_directory(destination_parent).await {
            return Err(FilesError::InvalidOperation(format!(
                "destination directory {} does not exist",
                destination_parent.display()
            )));
        }

        let operation = if source_metadata.is_dir() {
            self.prepare_tree(kind, source, destination).await?
        } else {
            if is_directory(&destination).await {
                return Err(FilesError::InvalidOperation(format!(
                    "cannot replace directory {} with a file",
                    destination.display()
                )));
            }
            let temp = path::temp_file_path(&destination)?;
            Arc::new(TransferOperation::new(
                kind,
                source,
                destination,
                Some(temp),
                source_metadata.len(),
            ))
        };

        info!(
            id = %operation.id(),
            kind = kind.as_str(),
            source = ?operation.source(),
            destination = ?operation.destination(),
            total_size = operation.total_size(),
            "Transfer started"
        );

        let provider = self.provider.clone();
        let task_operation = operation.clone();
        let handle = tokio::spawn(async move {
            let result = if task_operation.temp_path().is_some() {
                run_file(&provider, &task_operation).await
            } else {
                run_tree(&provider, &task_operation).await
            };

            match &result {
                Ok(()) => info!(id = %task_operation.id(), "Transfer completed"),
                Err(e) => warn!(id = %task_operation.id(), error = %e, "Transfer failed"),
            }
            task_operation.finish(&result);
            result
        });
        operation.attach(handle);

        Ok(operation)
    }

    async fn prepare_tree(
        &self,
        kind: TransferKind,
        source: PathBuf,
        destination: PathBuf,
    ) -> Result<Arc<TransferOperation>> {
        if path::is_ancestor(&source, &destination) || path::is_ancestor(&destination, &source) {
            return Err(FilesError::InvalidOperation(
                "source and destination must not contain each other".to_string(),
            ));
        }

        if tokio::fs::symlink_metadata(&destination).await.is_ok()
            && !is_directory(&destination).await
        {
            return Err(FilesError::InvalidOperation(format!(
                "cannot replace file {} with a directory",
                destination.display()
            )));
        }

        let provider = self.provider.clone();
        let root = source.clone();
        // Trees holding a link anywhere are refused, the root included.
        let total_size = tokio::task::spawn_blocking(move || {
            if let Some(link) = provider.find_link(&root)? {
                return Err(FilesError::InvalidOperation(format!(
                    "cannot transfer a tree containing the link {}",
                    link.display()
                )));
            }
            provider
                .get_files(&root, "*", SearchOption::AllDirectories)
                .map(|files| files.iter().map(|f| f.size()).sum::<u64>())
        })
        .await??;

        Ok(Arc::new(TransferOperation::new(
            kind,
            source,
            destination,
            None,
            total_size,
        )))
    }
}

async fn run_file(provider: &FileProvider, operation: &TransferOperation) -> Result<()> {
    if operation.is_cancelled() {
        return Err(FilesError::Cancelled);
    }

    let temp = operation
        .temp_path()
        .ok_or_else(|| FilesError::InvalidOperation("missing staging path".to_string()))?;

    safe::transfer_file(
        provider,
        operation.source(),
        operation.destination(),
        temp,
        operation.kind(),
    )
    .await?;

    operation.add_progress(provider.get_file(operation.destination())?.size());
    Ok(())
}

async fn run_tree(provider: &Arc<FileProvider>, operation: &Arc<TransferOperation>) -> Result<()> {
    let source = operation.source().to_path_buf();
    let destination = operation.destination().to_path_buf();

    provider.create_directory(&destination).await?;

    let directories = {
        let provider = provider.clone();
        let root = source.clone();
        tokio::task::spawn_blocking(move || {
            provider.get_directories(&root, "*", SearchOption::AllDirectories)
        })
        .await??
    };

    let mut units = JoinSet::new();
    units.spawn(transfer_directory(
        provider.clone(),
        operation.clone(),
        source.clone(),
        destination.clone(),
    ));

    for directory in directories {
        let relative = directory.path().strip_prefix(&source).map_err(|_| {
            FilesError::InvalidOperation(format!(
                "{} is outside {}",
                directory.path().display(),
                source.display()
            ))
        })?;

        units.spawn(transfer_directory(
            provider.clone(),
            operation.clone(),
            directory.path().to_path_buf(),
            destination.join(relative),
        ));
    }

    join_all(units).await?;

    if operation.kind() == TransferKind::Move {
        debug!(source = ?source, "Removing moved source tree");
        provider.delete(&source).await?;
    }

    Ok(())
}

/// Mirror one directory and transfer the files directly inside it.
async fn transfer_directory(
    provider: Arc<FileProvider>,
    operation: Arc<TransferOperation>,
    source: PathBuf,
    destination: PathBuf,
) -> Result<()> {
    if operation.is_cancelled() {
        return Err(FilesError::Cancelled);
    }

    provider.create_directory(&destination).await?;

    let files = {
        let provider = provider.clone();
        let dir = source.clone();
        tokio::task::spawn_blocking(move || {
            provider.get_files(&dir, "*", SearchOption::TopDirectoryOnly)
        })
        .await??
    };

    let mut transfers = JoinSet::new();
    for file in files {
        let target = destination.join(file.name());
        transfers.spawn(transfer_tree_file(
            provider.clone(),
            operation.clone(),
            file.path().to_path_buf(),
            target,
        ));
    }

    join_all(transfers).await
}

async fn transfer_tree_file(
    provider: Arc<FileProvider>,
    operation: Arc<TransferOperation>,
    source: PathBuf,
    destination: PathBuf,
) -> Result<()> {
    if operation.is_cancelled() {
        return Err(FilesError::Cancelled);
    }

    let temp = path::temp_file_path(&destination)?;
    safe::transfer_file(&provider, &source, &destination, &temp, operation.kind()).await?;

    operation.add_progress(provider.get_file(&destination)?.size());
    Ok(())
}

/// Wait for every task and return the first error seen.
async fn join_all(mut tasks: JoinSet<Result<()>>) -> Result<()> {
    let mut first_error = None;

    while let Some(joined) = tasks.join_next().await {
        let outcome = joined.map_err(FilesError::from).and_then(|result| result);
        if let Err(e) = outcome {
            if first_error.is_none() {
                first_error = Some(e);
            } else {
                debug!(error = %e, "Additional transfer failure");
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

async fn is_directory(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}
