//! Small filesystem helpers shared by the pipeline stages.

use std::io::ErrorKind;
use std::path::Path;

use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Delete a file, treating "already gone" as success.
///
/// Returns whether a file was actually removed.
pub async fn remove_file_if_exists(path: &Path) -> std::io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Replace `path` with `contents` through a synced temp file and rename.
pub async fn atomic_write_file(temp: &Path, path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(temp).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(temp, path).await
}

/// Restrict a file to its owner (`0600`).
#[cfg(unix)]
pub async fn restrict_to_owner(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await
}

#[cfg(not(unix))]
pub async fn restrict_to_owner(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
