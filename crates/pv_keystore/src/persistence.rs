//! Persistence boundary.
//!
//! The keystore does not own a storage engine; it writes through this
//! abstract key/value interface and hosts plug in whatever they have
//! (SQLite, browser storage, a test map).
//!
//! Values never land in the host store in the clear: `EncryptedPersistence`
//! wraps any backing store and seals every value with a key derived from
//! the identity key, binding each value to its storage key via associated
//! data so entries cannot be swapped around underneath us.

use std::collections::HashMap;
use std::sync::Mutex;

use zeroize::Zeroizing;

use pv_crypto::{aead, kdf, Ciphertext, PrivateKey};

use crate::error::KeystoreError;

/// Abstract key/value store. Implementations must be safe to call from
/// concurrent batch operations.
pub trait Persistence: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KeystoreError>;
    fn set(&self, key: &str, value: Vec<u8>) -> Result<(), KeystoreError>;
}

impl<P: Persistence + ?Sized> Persistence for &P {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KeystoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: Vec<u8>) -> Result<(), KeystoreError> {
        (**self).set(key, value)
    }
}

impl<P: Persistence + ?Sized> Persistence for Box<P> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KeystoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: Vec<u8>) -> Result<(), KeystoreError> {
        (**self).set(key, value)
    }
}

impl<P: Persistence + ?Sized> Persistence for std::sync::Arc<P> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KeystoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: Vec<u8>) -> Result<(), KeystoreError> {
        (**self).set(key, value)
    }
}

/// Test and single-process store.
#[derive(Default)]
pub struct InMemoryPersistence {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Persistence for InMemoryPersistence {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KeystoreError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| KeystoreError::Persistence("store mutex poisoned".into()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: Vec<u8>) -> Result<(), KeystoreError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| KeystoreError::Persistence("store mutex poisoned".into()))?;
        entries.insert(key.to_string(), value);
        Ok(())
    }
}

/// Encrypts every value before it reaches the backing store.
pub struct EncryptedPersistence<P> {
    inner: P,
    key: Zeroizing<[u8; 32]>,
}

impl<P: Persistence> EncryptedPersistence<P> {
    /// Derive the storage key from the identity key. Deterministic, so a
    /// reopened keystore can read its own history.
    pub fn new(inner: P, identity: &PrivateKey) -> Result<Self, KeystoreError> {
        let ikm = Zeroizing::new(identity.to_bytes());
        let mut key = Zeroizing::new([0u8; 32]);
        kdf::hkdf_expand(&ikm[..], None, b"storage-encryption", &mut key[..])
            .map_err(KeystoreError::Crypto)?;
        Ok(Self { inner, key })
    }
}

impl<P: Persistence> Persistence for EncryptedPersistence<P> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KeystoreError> {
        let Some(stored) = self.inner.get(key)? else {
            return Ok(None);
        };
        let ciphertext: Ciphertext = serde_json::from_slice(&stored)?;
        let plain = aead::decrypt(&ciphertext, &self.key[..], key.as_bytes())?;
        Ok(Some(plain.to_vec()))
    }

    fn set(&self, key: &str, value: Vec<u8>) -> Result<(), KeystoreError> {
        let ciphertext = aead::encrypt(&value, &self.key[..], key.as_bytes())?;
        self.inner.set(key, serde_json::to_vec(&ciphertext)?)
    }
}
