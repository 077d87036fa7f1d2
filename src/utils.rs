use std::path::Path;

use anyhow::{Context, Result};
use log::info;
use tokio::fs;

/// Creates `dir` and its parents unless it already exists.
pub async fn ensure_directory_exists(dir: impl AsRef<Path>) -> Result<()> {
    let dir = dir.as_ref();
    if fs::try_exists(dir).await.unwrap_or(false) {
        return Ok(());
    }
    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create directory {}", dir.display()))?;
    info!("Created directory {}", dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_nested_directories_once() {
        let root = std::env::temp_dir().join(format!("dooropener-utils-{}", std::process::id()));
        let nested = root.join("a").join("b");

        ensure_directory_exists(&nested).await.expect("create");
        assert!(nested.is_dir());
        ensure_directory_exists(&nested).await.expect("idempotent");

        let _ = std::fs::remove_dir_all(&root);
    }
}
