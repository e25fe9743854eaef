//! Side files and best-effort file shuffling around the temp directory.

use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

/// Download the stream thumbnail. Returns false (and cleans up) on failure.
pub async fn download_thumbnail(url: &str, path: &Path) -> bool {
    let result = async {
        let response = reqwest::Client::new()
            .get(url)
            .timeout(Duration::from_secs(5))
            .send()
            .await?
            .error_for_status()?;
        let bytes = response.bytes().await?;
        std::fs::write(path, &bytes).map_err(anyhow::Error::from)?;
        Ok::<_, anyhow::Error>(())
    }
    .await;

    match result {
        Ok(()) => true,
        Err(err) => {
            warn!(error = %err, "failed to download thumbnail");
            try_delete(path);
            false
        }
    }
}

/// Move `src` to `dst` if it exists; failures are only warned about.
pub fn try_move(src: &Path, dst: &Path) {
    if !src.exists() {
        return;
    }
    info!(from = %src.display(), to = %dst.display(), "moving file");
    if let Err(err) = std::fs::rename(src, dst) {
        warn!(error = %err, "error moving file");
    }
}

/// Delete `path` if it exists; failures are only warned about.
pub fn try_delete(path: &Path) {
    if !path.exists() {
        return;
    }
    info!(path = %path.display(), "deleting file");
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(error = %err, "error deleting file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_and_delete_are_quiet_on_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        try_move(&dir.path().join("missing"), &dir.path().join("dst"));
        try_delete(&dir.path().join("missing"));
    }

    #[test]
    fn try_move_relocates() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.ts");
        let dst = dir.path().join("b.ts");
        std::fs::write(&src, b"data").unwrap();
        try_move(&src, &dst);
        assert!(!src.exists());
        assert_eq!(std::fs::read(&dst).unwrap(), b"data");
    }
}
