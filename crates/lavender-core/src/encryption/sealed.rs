//! Sealed database file: keeps the SQLite file encrypted while no process
//! has it open.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::EncryptionLayer;
use crate::error::Result;

/// Pairs a plaintext database path with its encrypted `.enc` sibling
#[derive(Debug)]
pub struct SealedDatabase {
    plain_path: PathBuf,
    sealed_path: PathBuf,
    layer: EncryptionLayer,
}

impl SealedDatabase {
    pub fn new(plain_path: PathBuf, sealed_path: PathBuf, layer: EncryptionLayer) -> Self {
        Self {
            plain_path,
            sealed_path,
            layer,
        }
    }

    pub fn plain_path(&self) -> &Path {
        &self.plain_path
    }

    pub fn sealed_path(&self) -> &Path {
        &self.sealed_path
    }

    /// Decrypt the sealed copy into place. Returns `false` when there is
    /// nothing sealed yet (fresh install) or when a plaintext copy is already
    /// present.
    ///
    /// An existing plaintext file is never overwritten: it means an earlier
    /// run did not seal, so it is newer than the sealed copy. The next
    /// [`SealedDatabase::seal`] replaces the sealed copy with it.
    pub fn unseal(&self) -> Result<bool> {
        if !self.sealed_path.exists() {
            debug!("No sealed database at {}", self.sealed_path.display());
            return Ok(false);
        }

        if self.plain_path.exists() {
            warn!(
                "Plaintext database {} already exists, keeping it over {}",
                self.plain_path.display(),
                self.sealed_path.display()
            );
            return Ok(false);
        }

        self.layer.decrypt_file(&self.sealed_path, &self.plain_path)?;
        info!("Unsealed database to {}", self.plain_path.display());
        Ok(true)
    }

    /// Encrypt the plaintext database and remove the plaintext file.
    /// Returns `false` when there is no plaintext database to seal.
    pub fn seal(&self) -> Result<bool> {
        if !self.plain_path.exists() {
            debug!("No plaintext database at {}", self.plain_path.display());
            return Ok(false);
        }

        self.layer.encrypt_file(&self.plain_path, &self.sealed_path)?;
        std::fs::remove_file(&self.plain_path)?;
        info!("Sealed database to {}", self.sealed_path.display());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encryption::{SaltContext, KEY_SIZE};
    use crate::error::LavenderError;

    fn sealed_in(dir: &Path, key: u8) -> SealedDatabase {
        SealedDatabase::new(
            dir.join("lavender.db"),
            dir.join("lavender.db.enc"),
            EncryptionLayer::from_key(&[key; KEY_SIZE], SaltContext::Local),
        )
    }

    #[test]
    fn test_seal_then_unseal_restores_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let sealed = sealed_in(dir.path(), 1);
        std::fs::write(sealed.plain_path(), b"database bytes").unwrap();

        assert!(sealed.seal().unwrap());
        assert!(!sealed.plain_path().exists());
        assert!(sealed.sealed_path().exists());

        assert!(sealed.unseal().unwrap());
        assert_eq!(std::fs::read(sealed.plain_path()).unwrap(), b"database bytes");
    }

    #[test]
    fn test_nothing_to_do_on_fresh_directory() {
        let dir = tempfile::tempdir().unwrap();
        let sealed = sealed_in(dir.path(), 1);
        assert!(!sealed.unseal().unwrap());
        assert!(!sealed.seal().unwrap());
    }

    #[test]
    fn test_unseal_keeps_newer_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let sealed = sealed_in(dir.path(), 1);
        std::fs::write(sealed.plain_path(), b"old").unwrap();
        sealed.seal().unwrap();
        sealed.unseal().unwrap();

        // Written after unsealing, then the process exits without sealing
        std::fs::write(sealed.plain_path(), b"old + new").unwrap();

        assert!(!sealed.unseal().unwrap());
        assert_eq!(std::fs::read(sealed.plain_path()).unwrap(), b"old + new");

        // Sealing now promotes the plaintext to the sealed copy
        assert!(sealed.seal().unwrap());
        assert!(sealed.unseal().unwrap());
        assert_eq!(std::fs::read(sealed.plain_path()).unwrap(), b"old + new");
    }

    #[tokio::test]
    async fn test_memory_written_while_unsealed_survives_next_unseal() {
        use crate::memory::{MemoryStore, NewMemory};

        let dir = tempfile::tempdir().unwrap();
        let sealed = sealed_in(dir.path(), 3);

        let store = MemoryStore::open(sealed.plain_path()).await.unwrap();
        store.store_memory(&NewMemory::new("old", "before sealing")).await.unwrap();
        store.close().await.unwrap();
        sealed.seal().unwrap();

        sealed.unseal().unwrap();
        let store = MemoryStore::open(sealed.plain_path()).await.unwrap();
        let new_id = store
            .store_memory(&NewMemory::new("new", "never sealed"))
            .await
            .unwrap();
        store.close().await.unwrap();

        sealed.unseal().unwrap();
        let store = MemoryStore::open(sealed.plain_path()).await.unwrap();
        assert!(store.recall_memory(&new_id).await.unwrap().is_some());
        assert_eq!(store.get_stats().await.unwrap().total_memories, 2);
    }

    #[test]
    fn test_unseal_with_wrong_key_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let sealed = sealed_in(dir.path(), 1);
        std::fs::write(sealed.plain_path(), b"database bytes").unwrap();
        sealed.seal().unwrap();

        let wrong = sealed_in(dir.path(), 2);
        assert!(matches!(wrong.unseal(), Err(LavenderError::AuthenticationFailed)));
        assert!(!wrong.plain_path().exists());
    }
}
