//! Device identity.
//!
//! A device is known to the admin server by a random UUID generated on first
//! start and kept on disk afterwards.

use anyhow::{Context, Result};
use std::path::Path;
use uuid::Uuid;

/// Read the persisted device id, or generate and persist a new one.
pub async fn load_or_create_device_id(path: &Path) -> Result<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) if !contents.trim().is_empty() => {
            return Ok(contents.trim().to_string());
        }
        Ok(_) => tracing::warn!("Device id file {} is empty, regenerating", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e)
                .with_context(|| format!("Failed to read device id from {}", path.display()));
        }
    }

    let id = Uuid::new_v4().to_string();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .context("Failed to create device id directory")?;
    }
    tokio::fs::write(path, &id)
        .await
        .with_context(|| format!("Failed to persist device id to {}", path.display()))?;

    tracing::info!(device_id = %id, "Generated new device id");
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn id_is_generated_once_and_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("tv-id");

        let first = load_or_create_device_id(&path).await.unwrap();
        assert!(Uuid::parse_str(&first).is_ok());

        let second = load_or_create_device_id(&path).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn existing_id_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tv-id");
        std::fs::write(&path, "lobby-screen-3\n").unwrap();

        assert_eq!(load_or_create_device_id(&path).await.unwrap(), "lobby-screen-3");
    }

    #[tokio::test]
    async fn empty_file_gets_a_fresh_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tv-id");
        std::fs::write(&path, "  \n").unwrap();

        let id = load_or_create_device_id(&path).await.unwrap();
        assert!(Uuid::parse_str(&id).is_ok());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), id);
    }
}
