use std::{path::Path, sync::Arc};

use anyhow::Result;
use tracing::info;

use crate::fs::atomic::{read_optional, write_atomic};

/// Returns the identifier of this installation, generating and persisting one on first use.
/// It has to stay the same for the life of the installation: other devices know our counters only
/// under this name.
pub async fn load_or_create_device_id(path: &Path) -> Result<Arc<str>> {
    if let Some(id) = read_device_id(path).await? {
        return Ok(id);
    }

    let id = uuid::Uuid::new_v4().to_string().to_uppercase();
    write_atomic(path, id.as_bytes()).await?;
    info!("Generated device id {id}");
    Ok(id.into())
}

/// Reads the identifier without creating one. Used by read-only commands.
pub async fn read_device_id(path: &Path) -> Result<Option<Arc<str>>> {
    let id = read_optional(path)
        .await?
        .map(|bytes| String::from_utf8_lossy(&bytes).trim().to_owned())
        .filter(|id| !id.is_empty());
    Ok(id.map(Into::into))
}
