//! Directory-backed file store

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use rand::Rng;
use tokio::io::AsyncReadExt;

use super::{validate_filename, FileStore};
use crate::error::{Error, Result};
use crate::types::{system_time_from_timestamp, timestamp_from_system_time, Timestamp};

/// Stores each replicated file as a plain file in one directory
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Open a store rooted at `root`, creating the directory if missing
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        tracing::debug!("File store opened at {:?}", root);
        Ok(Self { root })
    }

    /// Directory holding the files
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        validate_filename(name)?;
        Ok(self.root.join(name))
    }

    /// Temp names stay short so any valid target name can be staged
    fn temp_path(&self) -> PathBuf {
        let suffix: u64 = rand::thread_rng().gen();
        self.root.join(format!(".tmp-{:016x}", suffix))
    }
}

/// Write to a temp name, then rename over the target
fn write_atomic(
    target: &Path,
    temp: &Path,
    data: &[u8],
    modified: Option<Timestamp>,
) -> std::io::Result<()> {
    let result = (|| {
        let mut file = File::create(temp)?;
        file.write_all(data)?;
        if let Some(ts) = modified {
            file.set_modified(system_time_from_timestamp(ts))?;
        }
        file.sync_all()?;
        drop(file);
        fs::rename(temp, target)
    })();

    if result.is_err() {
        let _ = fs::remove_file(temp);
    }
    result
}

#[async_trait::async_trait]
impl FileStore for DiskStore {
    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.mod_time(name).await?.is_some())
    }

    async fn mod_time(&self, name: &str) -> Result<Option<Timestamp>> {
        let path = self.path_for(name)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(timestamp_from_system_time(meta.modified()?))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.path_for(name)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::NotFound(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_versioned(&self, name: &str) -> Result<Option<(Vec<u8>, Timestamp)>> {
        let path = self.path_for(name)?;
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        // A rename over the path after open leaves this handle on the old file
        let meta = file.metadata().await?;
        if !meta.is_file() {
            return Ok(None);
        }
        let modified = timestamp_from_system_time(meta.modified()?);

        let mut data = Vec::with_capacity(meta.len() as usize);
        file.read_to_end(&mut data).await?;
        Ok(Some((data, modified)))
    }

    async fn write(&self, name: &str, data: &[u8], modified: Option<Timestamp>) -> Result<()> {
        let target = self.path_for(name)?;
        let temp = self.temp_path();
        let data = data.to_vec();

        tokio::task::spawn_blocking(move || write_atomic(&target, &temp, &data, modified))
            .await
            .map_err(|e| Error::Internal(format!("write task failed: {}", e)))??;

        tracing::debug!("Stored {} locally", name);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_filename(name).is_ok() {
                    names.push(name.to_string());
                }
            }
        }

        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MAX_FILENAME_LEN;

    fn store() -> (tempfile::TempDir, DiskStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path().join("data")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_missing_file_is_absent() {
        let (_dir, store) = store();
        assert_eq!(store.mod_time("report.txt").await.unwrap(), None);
        assert!(!store.exists("report.txt").await.unwrap());
        assert!(matches!(store.read("report.txt").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_write_pins_modification_time() {
        let (_dir, store) = store();
        store.write("report.txt", b"quarterly", Some(100)).await.unwrap();

        assert_eq!(store.mod_time("report.txt").await.unwrap(), Some(100));
        assert_eq!(store.read("report.txt").await.unwrap(), b"quarterly");
    }

    #[tokio::test]
    async fn test_overwrite_replaces_content() {
        let (_dir, store) = store();
        store.write("x.txt", b"first version, longer", None).await.unwrap();
        store.write("x.txt", b"second", Some(5_000)).await.unwrap();

        assert_eq!(store.read("x.txt").await.unwrap(), b"second");
        assert_eq!(store.mod_time("x.txt").await.unwrap(), Some(5_000));
    }

    #[tokio::test]
    async fn test_write_without_timestamp_uses_now() {
        let (_dir, store) = store();
        let before = timestamp_from_system_time(std::time::SystemTime::now());
        store.write("now.txt", b"data", None).await.unwrap();

        let ts = store.mod_time("now.txt").await.unwrap().unwrap();
        // Filesystem mtime granularity can round down slightly
        assert!(ts + 2_000 >= before);
    }

    #[tokio::test]
    async fn test_list_skips_temp_files_and_dirs() {
        let (_dir, store) = store();
        store.write("b.txt", b"b", None).await.unwrap();
        store.write("a.txt", b"a", None).await.unwrap();
        fs::write(store.root().join(".a.txt.tmp-0000beef"), b"partial").unwrap();
        fs::create_dir(store.root().join("subdir")).unwrap();

        assert_eq!(store.list().await.unwrap(), vec!["a.txt", "b.txt"]);
    }

    #[tokio::test]
    async fn test_read_versioned_pairs_bytes_with_mtime() {
        let (_dir, store) = store();
        assert_eq!(store.read_versioned("v.txt").await.unwrap(), None);

        store.write("v.txt", b"one", Some(1_000)).await.unwrap();
        let path = store.root().join("v.txt");
        let mut file = tokio::fs::File::open(&path).await.unwrap();

        // Replaced after a reader opened the old copy
        store.write("v.txt", b"two", Some(2_000)).await.unwrap();
        let meta = file.metadata().await.unwrap();
        let mut old = Vec::new();
        file.read_to_end(&mut old).await.unwrap();
        assert_eq!(old, b"one");
        assert_eq!(timestamp_from_system_time(meta.modified().unwrap()), 1_000);

        assert_eq!(
            store.read_versioned("v.txt").await.unwrap(),
            Some((b"two".to_vec(), 2_000))
        );
    }

    #[tokio::test]
    async fn test_longest_valid_name_is_writable() {
        let (_dir, store) = store();
        let name = "a".repeat(MAX_FILENAME_LEN - 1);
        validate_filename(&name).unwrap();

        store.write(&name, b"x", Some(1_000)).await.unwrap();
        assert_eq!(store.read(&name).await.unwrap(), b"x");
        assert_eq!(store.list().await.unwrap(), vec![name]);
    }

    #[tokio::test]
    async fn test_invalid_names_rejected() {
        let (_dir, store) = store();
        assert!(matches!(
            store.write("../escape", b"x", None).await,
            Err(Error::InvalidFilename(_))
        ));
        assert!(matches!(
            store.mod_time("a/b").await,
            Err(Error::InvalidFilename(_))
        ));
    }
}
