//! Secret storage interface.
//!
//! Secret storage backends themselves are out of scope (§1); this trait and
//! two small implementations (in-memory, single-file) exist only so the
//! rest of the crate has something concrete to load the own-keypair from.

use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use super::KeyError;

pub trait SecretStore: Send + Sync {
    fn load_signing_key(&self) -> Result<Option<Vec<u8>>, KeyError>;
    fn store_signing_key(&self, bytes: &[u8]) -> Result<(), KeyError>;
}

/// In-memory secret store, used in tests and single-process demos.
#[derive(Default)]
pub struct InMemorySecretStore {
    key: Mutex<Option<Vec<u8>>>,
}

impl SecretStore for InMemorySecretStore {
    fn load_signing_key(&self) -> Result<Option<Vec<u8>>, KeyError> {
        Ok(self.key.lock().expect("lock poisoned").clone())
    }

    fn store_signing_key(&self, bytes: &[u8]) -> Result<(), KeyError> {
        *self.key.lock().expect("lock poisoned") = Some(bytes.to_vec());
        Ok(())
    }
}

/// Single-file secret store: the raw 32-byte secp256k1 secret key lives at
/// `path`. Not a production secret-storage integration (out of scope,
/// §1) — a minimal default so a node can run without one.
pub struct FileSecretStore {
    path: PathBuf,
}

impl FileSecretStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SecretStore for FileSecretStore {
    fn load_signing_key(&self) -> Result<Option<Vec<u8>>, KeyError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(KeyError::Store(e.to_string())),
        }
    }

    fn store_signing_key(&self, bytes: &[u8]) -> Result<(), KeyError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| KeyError::Store(e.to_string()))?;
        }
        fs::write(&self.path, bytes).map_err(|e| KeyError::Store(e.to_string()))
    }
}
