//! Filesystem-backed [`ObjectStore`]. Keys map directly onto nested paths
//! under a root directory, since the key layout in §6 is already
//! hierarchical (`BLOCK/...`, `BROADCAST/TO_BROADCAST/{id}/{uuid}`).

use std::path::{Path, PathBuf};

use tokio::fs;

use super::{ObjectStore, StorageError};

pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait::async_trait]
impl ObjectStore for FsObjectStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e.to_string())),
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| StorageError::Io(e.to_string()))?;
        }
        fs::write(&path, value).await.map_err(|e| StorageError::Io(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e.to_string())),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut out = Vec::new();
        walk(&self.root, &self.root.join(prefix_dir(prefix)), &self.root, prefix, &mut out).await?;
        Ok(out)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), StorageError> {
        for key in self.list(prefix).await? {
            self.delete(&key).await?;
        }
        let dir = self.root.join(prefix.trim_end_matches('/'));
        let _ = fs::remove_dir_all(&dir).await;
        Ok(())
    }
}

fn prefix_dir(prefix: &str) -> &str {
    match prefix.rfind('/') {
        Some(idx) => &prefix[..idx],
        None => "",
    }
}

fn walk<'a>(
    root: &'a Path,
    dir: &'a Path,
    store_root: &'a Path,
    prefix: &'a str,
    out: &'a mut Vec<String>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), StorageError>> + Send + 'a>> {
    Box::pin(async move {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StorageError::Io(e.to_string())),
        };

        while let Some(entry) = entries.next_entry().await.map_err(|e| StorageError::Io(e.to_string()))? {
            let path = entry.path();
            let relative = path
                .strip_prefix(store_root)
                .expect("walked path is under store root")
                .to_string_lossy()
                .replace(std::path::MAIN_SEPARATOR, "/");

            if path.is_dir() {
                walk(root, &path, store_root, prefix, out).await?;
            } else if relative.starts_with(prefix) {
                out.push(relative);
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn put_get_delete_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path());
        store.put("BLOCK/1", b"hello".to_vec()).await.unwrap();
        assert_eq!(store.get("BLOCK/1").await.unwrap(), Some(b"hello".to_vec()));
        store.delete("BLOCK/1").await.unwrap();
        assert_eq!(store.get("BLOCK/1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_finds_nested_batch_entries_under_a_block_prefix() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path());
        store.put("BROADCAST/TO_BROADCAST/1/aaa", vec![1]).await.unwrap();
        store.put("BROADCAST/TO_BROADCAST/1/bbb", vec![2]).await.unwrap();

        let mut listed = store.list("BROADCAST/TO_BROADCAST/1/").await.unwrap();
        listed.sort();
        assert_eq!(listed, vec!["BROADCAST/TO_BROADCAST/1/aaa", "BROADCAST/TO_BROADCAST/1/bbb"]);
    }

    #[tokio::test]
    async fn delete_prefix_removes_the_whole_batch_directory() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path());
        store.put("BROADCAST/TO_BROADCAST/1/aaa", vec![1]).await.unwrap();
        store.delete_prefix("BROADCAST/TO_BROADCAST/1/").await.unwrap();
        assert!(store.list("BROADCAST/TO_BROADCAST/1/").await.unwrap().is_empty());
    }
}
