use super::*;

#[test]
fn memory_storage_get_set_remove() {
    let storage = MemoryStorage::new();
    assert_eq!(storage.get("k").unwrap(), None);
    storage.set("k", "v").unwrap();
    assert_eq!(storage.get("k").unwrap().as_deref(), Some("v"));
    storage.remove("k").unwrap();
    assert!(storage.is_empty());
}

#[test]
fn memory_storage_take_deletes() {
    let storage = MemoryStorage::new();
    storage.set("k", "v").unwrap();
    assert_eq!(storage.take("k").unwrap().as_deref(), Some("v"));
    assert_eq!(storage.take("k").unwrap(), None);
}

#[test]
fn memory_storage_clones_share_state() {
    let a = MemoryStorage::new();
    let b = a.clone();
    a.set("k", "v").unwrap();
    assert_eq!(b.len(), 1);
}

#[test]
fn unavailable_storage_errors_everywhere() {
    let storage = UnavailableStorage;
    assert!(storage.get("k").is_err());
    assert!(storage.set("k", "v").is_err());
    assert!(storage.remove("k").is_err());
    let err = storage.take("k").unwrap_err();
    assert_eq!(err.error_code(), "E_STORAGE_UNAVAILABLE");
}

/// Storage relying on the default `take`.
struct GetSetOnly(MemoryStorage);

impl SessionStorage for GetSetOnly {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.0.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.0.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.0.remove(key)
    }
}

#[test]
fn default_take_reads_then_removes() {
    let storage = GetSetOnly(MemoryStorage::new());
    storage.set("k", "v").unwrap();
    assert_eq!(storage.take("k").unwrap().as_deref(), Some("v"));
    assert!(storage.0.is_empty());
}
