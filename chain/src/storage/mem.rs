//! In-memory [`ObjectStore`], used by tests and single-process demos.

use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{ObjectStore, StorageError};

#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

#[async_trait::async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.objects.lock().expect("lock poisoned").get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.objects.lock().expect("lock poisoned").insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.objects.lock().expect("lock poisoned").remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .objects
            .lock()
            .expect("lock poisoned")
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), StorageError> {
        let mut objects = self.objects.lock().expect("lock poisoned");
        let to_remove: Vec<String> =
            objects.range(prefix.to_string()..).take_while(|(k, _)| k.starts_with(prefix)).map(|(k, _)| k.clone()).collect();
        for key in to_remove {
            objects.remove(&key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = InMemoryObjectStore::default();
        store.put("BLOCK/1", b"payload".to_vec()).await.unwrap();
        assert_eq!(store.get("BLOCK/1").await.unwrap(), Some(b"payload".to_vec()));
        assert_eq!(store.get("BLOCK/2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_and_delete_prefix_scope_to_matching_keys() {
        let store = InMemoryObjectStore::default();
        store.put("BROADCAST/TO_BROADCAST/1/a", vec![1]).await.unwrap();
        store.put("BROADCAST/TO_BROADCAST/1/b", vec![2]).await.unwrap();
        store.put("BROADCAST/TO_BROADCAST/2/a", vec![3]).await.unwrap();

        let listed = store.list("BROADCAST/TO_BROADCAST/1/").await.unwrap();
        assert_eq!(listed.len(), 2);

        store.delete_prefix("BROADCAST/TO_BROADCAST/1/").await.unwrap();
        assert!(store.list("BROADCAST/TO_BROADCAST/1/").await.unwrap().is_empty());
        assert_eq!(store.list("BROADCAST/TO_BROADCAST/2/").await.unwrap().len(), 1);
    }
}
