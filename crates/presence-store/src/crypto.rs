//! Embedding-at-rest encryption — AES-256-GCM with a local key file.
//!
//! Stored embedding blobs are `nonce (12 bytes) || ciphertext`. The key
//! lives in a mode-0600 file next to the database and is generated on
//! first use.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use std::path::Path;
use thiserror::Error;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key file {path}: {source}")]
    KeyFile {
        path: String,
        source: std::io::Error,
    },
    #[error("key file {0} has wrong length (expected {KEY_LEN} bytes)")]
    KeyLength(String),
    #[error("embedding blob too short to contain a nonce")]
    TruncatedBlob,
    #[error("decryption failed — wrong key or corrupted blob")]
    DecryptFailed,
    #[error("encryption failed")]
    EncryptFailed,
}

/// AES-256-GCM cipher for embedding blobs.
pub struct EmbeddingCipher {
    cipher: Aes256Gcm,
}

impl EmbeddingCipher {
    /// Load the key from `path`, generating a fresh one (mode 0600) if the
    /// file does not exist yet.
    pub fn from_key_file(path: &Path) -> Result<Self, CryptoError> {
        let io_err = |source| CryptoError::KeyFile {
            path: path.display().to_string(),
            source,
        };

        let key_bytes = if path.exists() {
            std::fs::read(path).map_err(io_err)?
        } else {
            let mut key = vec![0u8; KEY_LEN];
            rand::thread_rng().fill_bytes(&mut key);

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
            std::fs::write(path, &key).map_err(io_err)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                    .map_err(io_err)?;
            }
            tracing::info!(path = %path.display(), "generated embedding encryption key");
            key
        };

        if key_bytes.len() != KEY_LEN {
            return Err(CryptoError::KeyLength(path.display().to_string()));
        }

        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Encrypt a plaintext blob. Output is `nonce || ciphertext`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::EncryptFailed)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    /// Decrypt a `nonce || ciphertext` blob.
    pub fn open(&self, blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if blob.len() < NONCE_LEN {
            return Err(CryptoError::TruncatedBlob);
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::DecryptFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cipher_in(dir: &TempDir) -> EmbeddingCipher {
        EmbeddingCipher::from_key_file(&dir.path().join("embedding.key")).unwrap()
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let dir = TempDir::new().unwrap();
        let cipher = cipher_in(&dir);

        let plaintext = b"embedding bytes";
        let blob = cipher.seal(plaintext).unwrap();
        assert_ne!(&blob[NONCE_LEN..], plaintext.as_slice());
        assert_eq!(cipher.open(&blob).unwrap(), plaintext);
    }

    #[test]
    fn test_key_file_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("embedding.key");

        let first = EmbeddingCipher::from_key_file(&path).unwrap();
        let blob = first.seal(b"data").unwrap();

        // Reloading the same key file must decrypt blobs from the first.
        let second = EmbeddingCipher::from_key_file(&path).unwrap();
        assert_eq!(second.open(&blob).unwrap(), b"data");
        assert_eq!(std::fs::read(&path).unwrap().len(), KEY_LEN);
    }

    #[test]
    fn test_tampered_blob_rejected() {
        let dir = TempDir::new().unwrap();
        let cipher = cipher_in(&dir);

        let mut blob = cipher.seal(b"data").unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        assert!(matches!(cipher.open(&blob), Err(CryptoError::DecryptFailed)));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let dir = TempDir::new().unwrap();
        let a = EmbeddingCipher::from_key_file(&dir.path().join("a.key")).unwrap();
        let b = EmbeddingCipher::from_key_file(&dir.path().join("b.key")).unwrap();

        let blob = a.seal(b"data").unwrap();
        assert!(b.open(&blob).is_err());
    }

    #[test]
    fn test_truncated_blob_rejected() {
        let dir = TempDir::new().unwrap();
        let cipher = cipher_in(&dir);
        assert!(matches!(
            cipher.open(&[0u8; 4]),
            Err(CryptoError::TruncatedBlob)
        ));
    }

    #[test]
    fn test_short_key_file_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.key");
        std::fs::write(&path, [0u8; 7]).unwrap();
        assert!(matches!(
            EmbeddingCipher::from_key_file(&path),
            Err(CryptoError::KeyLength(_))
        ));
    }
}
