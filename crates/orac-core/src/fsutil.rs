//! Atomic file writes shared by every persistent store.

use std::io;
use std::path::{Path, PathBuf};

/// Write `contents` to `path` via a temp file in the same directory plus a
/// rename, so readers never observe a partial document.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, contents).await?;
    match tokio::fs::rename(&tmp, path).await {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = tokio::fs::remove_file(&tmp).await;
            Err(e)
        }
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    path.with_file_name(format!(".{file_name}.tmp"))
}
