//! Atomic file persistence helpers shared by every state store.
//!
//! All state files follow the same discipline: writes go to a sibling
//! temporary file and are renamed into place, and readers treat a missing or
//! corrupt file as empty state rather than crashing the process.

use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Serialize `value` as pretty JSON and atomically replace `path` with it.
///
/// Parent directories are created as needed. The rename makes the update
/// all-or-nothing on POSIX filesystems.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let body = serde_json::to_vec_pretty(value).map_err(std::io::Error::other)?;
    write_bytes_atomic(path, &body).await
}

/// Atomically replace `path` with `bytes` via write-temp-then-rename.
pub async fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

/// Load JSON state from `path`, treating absence or corruption as `T::default()`.
///
/// Corruption is logged once and never propagated; per the error policy a
/// damaged state file starts the component from empty state.
pub async fn read_json_or_default<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return T::default(),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "state file unreadable; starting empty");
            return T::default();
        }
    };
    match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "state file corrupt; starting empty");
            T::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Doc {
        count: u32,
    }

    #[tokio::test]
    async fn atomic_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/doc.json");
        write_json_atomic(&path, &Doc { count: 7 }).await.unwrap();
        let loaded: Doc = read_json_or_default(&path).await;
        assert_eq!(loaded, Doc { count: 7 });
    }

    #[tokio::test]
    async fn corrupt_file_reads_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, "{not json").unwrap();
        let loaded: Doc = read_json_or_default(&path).await;
        assert_eq!(loaded, Doc::default());
    }

    #[tokio::test]
    async fn missing_file_reads_as_default() {
        let loaded: Doc = read_json_or_default(Path::new("/definitely/missing.json")).await;
        assert_eq!(loaded, Doc::default());
    }
}
