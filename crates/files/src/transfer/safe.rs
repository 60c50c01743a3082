//! Single-file replace that never exposes a half-written destination.
//!
//! The source is staged next to the destination, an existing destination is
//! set aside under a swap name, and the staged file is renamed into place.
//! The swap copy is only discarded once the new file is confirmed present.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::operation::TransferKind;
use crate::error::Result;
use crate::path;
use crate::provider::FileProvider;

/// Transfer `source` onto `destination` through the staging path `temp`.
pub(crate) async fn transfer_file(
    provider: &FileProvider,
    source: &Path,
    destination: &Path,
    temp: &Path,
    kind: TransferKind,
) -> Result<()> {
    let mut swap = None;
    let result = stage_and_replace(provider, source, destination, temp, kind, &mut swap).await;

    cleanup(provider, source, destination, temp, swap.as_deref(), kind).await;

    result
}

async fn stage_and_replace(
    provider: &FileProvider,
    source: &Path,
    destination: &Path,
    temp: &Path,
    kind: TransferKind,
    swap: &mut Option<PathBuf>,
) -> Result<()> {
    debug!(source = ?source, temp = ?temp, kind = kind.as_str(), "Staging file");
    match kind {
        TransferKind::Copy => provider.copy(source, temp).await?,
        TransferKind::Move => provider.move_path(source, temp).await?,
    }

    if provider.exists(destination)? {
        let swap_path = path::temp_file_path(destination)?;
        debug!(destination = ?destination, swap = ?swap_path, "Setting existing destination aside");
        provider.move_path(destination, &swap_path).await?;
        *swap = Some(swap_path);
    }

    provider.move_path(temp, destination).await
}

/// Runs after every attempt, successful or not. Failures are logged only.
async fn cleanup(
    provider: &FileProvider,
    source: &Path,
    destination: &Path,
    temp: &Path,
    swap: Option<&Path>,
    kind: TransferKind,
) {
    if exists(provider, temp) {
        // A moved source must not be lost with the staging file.
        let restore_source = kind == TransferKind::Move && !exists(provider, source);
        let outcome = if restore_source {
            provider.move_path(temp, source).await
        } else {
            provider.delete(temp).await
        };
        if let Err(e) = outcome {
            warn!(temp = ?temp, error = %e, "Failed to clean up staging file");
        }
    }

    if let Some(swap) = swap {
        if exists(provider, swap) {
            let outcome = if exists(provider, destination) {
                provider.delete(swap).await
            } else {
                debug!(destination = ?destination, "Restoring original destination");
                provider.move_path(swap, destination).await
            };
            if let Err(e) = outcome {
                warn!(swap = ?swap, error = %e, "Failed to clean up swap file");
            }
        }
    }
}

fn exists(provider: &FileProvider, path: &Path) -> bool {
    provider.exists(path).unwrap_or(false)
}
