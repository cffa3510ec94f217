use std::collections::HashSet;
use std::io::Read;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use crate::keys::Key;
use crate::{CryptoError, CryptoGateway, Result};

const BLOB_MAGIC: &[u8] = b"TALKIE-MEMORY-1\n";

/// In-process stand-in for the encryption tool.
///
/// Holds a keyring (public keys plus the fingerprints whose secret half is
/// "present") and a remote directory that `fetch_remote_key` imports from.
/// Ciphertext is an opaque blob bound to its recipient: only a gateway
/// holding the recipient's secret key will decrypt it. It offers no actual
/// confidentiality.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    keyring: RwLock<Keyring>,
}

#[derive(Debug, Default)]
struct Keyring {
    public: Vec<Key>,
    secret: HashSet<String>,
    remote: Vec<Key>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_public_key(self, key: Key) -> Self {
        self.add_public_key(key);
        self
    }

    /// Adds both halves of the key pair.
    pub fn with_secret_key(self, key: Key) -> Self {
        self.write().secret.insert(key.fingerprint.clone());
        self.add_public_key(key);
        self
    }

    /// Make `key` available to `fetch_remote_key` without importing it.
    pub fn with_remote_key(self, key: Key) -> Self {
        self.write().remote.push(key);
        self
    }

    pub fn add_public_key(&self, key: Key) {
        let mut keyring = self.write();
        if !keyring.public.iter().any(|k| k.fingerprint == key.fingerprint) {
            keyring.public.push(key);
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Keyring> {
        self.keyring.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Keyring> {
        self.keyring.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl CryptoGateway for MemoryGateway {
    fn encrypt(&self, sender: &str, recipient: &str, plaintext: &mut dyn Read) -> Result<Vec<u8>> {
        if sender.is_empty() {
            return Err(CryptoError::InvalidArgument("empty sender identity"));
        }
        if recipient.is_empty() {
            return Err(CryptoError::InvalidArgument("empty recipient"));
        }
        {
            let keyring = self.read();
            if !keyring.secret.contains(sender) {
                return Err(CryptoError::NoSecretKey(sender.to_string()));
            }
            if !keyring.public.iter().any(|k| k.fingerprint == recipient) {
                return Err(CryptoError::KeyNotFound(recipient.to_string()));
            }
        }

        let mut blob = Vec::new();
        blob.extend_from_slice(BLOB_MAGIC);
        blob.extend_from_slice(sender.as_bytes());
        blob.push(b'\n');
        blob.extend_from_slice(recipient.as_bytes());
        blob.push(b'\n');
        plaintext.read_to_end(&mut blob)?;

        debug!("Sealed {} bytes for {}", blob.len(), recipient);
        Ok(blob)
    }

    fn decrypt(&self, identity: &str, ciphertext: &mut dyn Read) -> Result<Vec<u8>> {
        if identity.is_empty() {
            return Err(CryptoError::InvalidArgument("empty identity"));
        }
        if !self.read().secret.contains(identity) {
            return Err(CryptoError::NoSecretKey(identity.to_string()));
        }

        let mut blob = Vec::new();
        ciphertext.read_to_end(&mut blob)?;

        let body = blob.strip_prefix(BLOB_MAGIC).ok_or(CryptoError::Malformed("bad header"))?;
        let mut parts = body.splitn(3, |b| *b == b'\n');
        let _sender = parts.next().ok_or(CryptoError::Malformed("missing sender"))?;
        let recipient = parts.next().ok_or(CryptoError::Malformed("missing recipient"))?;
        let payload = parts.next().ok_or(CryptoError::Malformed("missing payload"))?;

        if recipient != identity.as_bytes() {
            return Err(CryptoError::NoSecretKey(identity.to_string()));
        }
        Ok(payload.to_vec())
    }

    fn list_public_keys(&self, search: &str) -> Result<Vec<Key>> {
        Ok(self.read().public.iter().filter(|k| k.matches(search)).cloned().collect())
    }

    fn list_secret_keys(&self, search: &str) -> Result<Vec<Key>> {
        let keyring = self.read();
        Ok(keyring
            .public
            .iter()
            .filter(|k| keyring.secret.contains(&k.fingerprint) && k.matches(search))
            .cloned()
            .collect())
    }

    fn fetch_remote_key(&self, fingerprint: &str) -> Result<()> {
        let found = self
            .read()
            .remote
            .iter()
            .find(|k| k.fingerprint == fingerprint)
            .cloned()
            .ok_or_else(|| CryptoError::KeyNotFound(fingerprint.to_string()))?;
        self.add_public_key(found);
        Ok(())
    }
}
