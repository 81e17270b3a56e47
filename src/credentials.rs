use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, KeyInit, OsRng as AeadOsRng},
    ChaCha20Poly1305, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::error::CredentialError;

const NONCE_LEN: usize = 12;

/// Bearer pair issued by `/api/auth/login`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"***")
            .field("refresh_token", &"***")
            .finish()
    }
}

/// Where the credential pair survives between runs.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Option<Credentials>, CredentialError>;
    fn save(&self, credentials: &Credentials) -> Result<(), CredentialError>;
    /// Must succeed when nothing is stored.
    fn clear(&self) -> Result<(), CredentialError>;
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    slot: Mutex<Option<Credentials>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(credentials: Credentials) -> Self {
        Self {
            slot: Mutex::new(Some(credentials)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<Credentials>, CredentialError> {
        Ok(self.slot.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn save(&self, credentials: &Credentials) -> Result<(), CredentialError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(credentials.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), CredentialError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// Credential file encrypted with ChaCha20-Poly1305. The key lives next to
/// it in `<path>.key` and is generated on first save.
pub struct FileCredentialStore {
    path: PathBuf,
    key_path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let key_path = path.with_extension("key");
        Self { path, key_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn cipher(&self, create: bool) -> Result<Option<ChaCha20Poly1305>, CredentialError> {
        if self.key_path.exists() {
            let key_bytes = fs::read(&self.key_path)?;
            let key_array: [u8; 32] = key_bytes
                .get(..32)
                .and_then(|bytes| bytes.try_into().ok())
                .ok_or_else(|| CredentialError::Corrupt("invalid key length".to_string()))?;
            return Ok(Some(ChaCha20Poly1305::new(&key_array.into())));
        }

        if !create {
            return Ok(None);
        }

        if let Some(parent) = self.key_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let key = ChaCha20Poly1305::generate_key(&mut AeadOsRng);
        fs::write(&self.key_path, key.as_slice())?;
        Ok(Some(ChaCha20Poly1305::new(&key)))
    }

    fn encrypt(cipher: &ChaCha20Poly1305, plaintext: &[u8]) -> Result<String, CredentialError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CredentialError::Crypto)?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend_from_slice(&ciphertext);

        Ok(base64::engine::general_purpose::STANDARD.encode(&combined))
    }

    fn decrypt(cipher: &ChaCha20Poly1305, encoded: &str) -> Result<Vec<u8>, CredentialError> {
        let combined = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| CredentialError::Corrupt(e.to_string()))?;

        if combined.len() < NONCE_LEN {
            return Err(CredentialError::Corrupt("too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CredentialError::Crypto)
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<Credentials>, CredentialError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let Some(cipher) = self.cipher(false)? else {
            return Err(CredentialError::Corrupt("missing key file".to_string()));
        };

        let encoded = fs::read_to_string(&self.path)?;
        let plaintext = Self::decrypt(&cipher, &encoded)?;
        Ok(Some(serde_json::from_slice(&plaintext)?))
    }

    fn save(&self, credentials: &Credentials) -> Result<(), CredentialError> {
        let cipher = self
            .cipher(true)?
            .ok_or_else(|| CredentialError::Corrupt("missing key file".to_string()))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let plaintext = serde_json::to_vec(credentials)?;
        fs::write(&self.path, Self::encrypt(&cipher, &plaintext)?)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), CredentialError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
