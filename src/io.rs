use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub async fn read_file_to_string_async(path: &Path) -> Result<String> {
    ensure_exists(path)?;
    let data = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading file: {}", path.display()))?;
    Ok(data)
}

pub async fn read_file_bytes_async(path: &Path) -> Result<Vec<u8>> {
    ensure_exists(path)?;
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading file: {}", path.display()))?;
    Ok(data)
}

fn ensure_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("file not found: {}", path.display());
    }
    Ok(())
}

/// Document name used for exports: the file name without its extension.
pub fn document_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

/// Create the parent directory of a file we are about to write.
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating directory: {}", parent.display()))?;
    }
    Ok(())
}

pub fn default_export_path() -> Result<PathBuf> {
    let base = dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join("Downloads")))
        .context("unable to resolve downloads directory")?;
    Ok(base.join("sections_export.csv"))
}
