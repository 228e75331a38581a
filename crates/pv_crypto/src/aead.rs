//! Authenticated encryption envelope.
//!
//! AES-256-GCM keyed through HKDF-SHA256: every envelope carries a fresh
//! random 32-byte salt and 12-byte nonce, and the AES key is re-derived from
//! (secret, salt) on both sides. The payload always ends with the 16-byte
//! GCM tag.
//!
//! The associated data is the encoded envelope header, so sender/recipient
//! metadata is tamper-evident even though it travels in the clear.

use aes_gcm::{
    aead::{Aead, Payload},
    Aes256Gcm, KeyInit, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use crate::{encoding, error::CryptoError, kdf};

pub const AES_KEY_SIZE: usize = 32;
pub const KDF_SALT_SIZE: usize = 32;
pub const GCM_NONCE_SIZE: usize = 12;
pub const GCM_TAG_SIZE: usize = 16;

/// One AEAD envelope: GCM payload (ciphertext plus tag), the HKDF salt the
/// key was derived with, and the GCM nonce. Length invariants hold for every
/// constructed value, including deserialized ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CiphertextRepr", into = "CiphertextRepr")]
pub struct Ciphertext {
    payload: Vec<u8>,
    salt: [u8; KDF_SALT_SIZE],
    nonce: [u8; GCM_NONCE_SIZE],
}

#[derive(Serialize, Deserialize)]
struct CiphertextRepr {
    #[serde(with = "encoding::hex_vec")]
    payload: Vec<u8>,
    #[serde(with = "encoding::hex_array")]
    hkdf_salt: [u8; KDF_SALT_SIZE],
    #[serde(with = "encoding::hex_array")]
    gcm_nonce: [u8; GCM_NONCE_SIZE],
}

impl Ciphertext {
    pub fn new(
        payload: Vec<u8>,
        salt: [u8; KDF_SALT_SIZE],
        nonce: [u8; GCM_NONCE_SIZE],
    ) -> Result<Self, CryptoError> {
        if payload.len() < GCM_TAG_SIZE {
            return Err(CryptoError::InvalidInput(format!(
                "ciphertext payload must be at least {GCM_TAG_SIZE} bytes, got {}",
                payload.len()
            )));
        }
        Ok(Self { payload, salt, nonce })
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn salt(&self) -> &[u8; KDF_SALT_SIZE] {
        &self.salt
    }

    pub fn nonce(&self) -> &[u8; GCM_NONCE_SIZE] {
        &self.nonce
    }
}

impl TryFrom<CiphertextRepr> for Ciphertext {
    type Error = CryptoError;

    fn try_from(repr: CiphertextRepr) -> Result<Self, CryptoError> {
        Ciphertext::new(repr.payload, repr.hkdf_salt, repr.gcm_nonce)
    }
}

impl From<Ciphertext> for CiphertextRepr {
    fn from(ct: Ciphertext) -> Self {
        CiphertextRepr {
            payload: ct.payload,
            hkdf_salt: ct.salt,
            gcm_nonce: ct.nonce,
        }
    }
}

fn derive_aes_key(secret: &[u8], salt: &[u8]) -> Result<[u8; AES_KEY_SIZE], CryptoError> {
    let mut key = [0u8; AES_KEY_SIZE];
    kdf::hkdf_expand(secret, Some(salt), &[], &mut key)?;
    Ok(key)
}

/// Encrypt `plaintext` under a secret of any length, binding `aad`.
pub fn encrypt(plaintext: &[u8], secret: &[u8], aad: &[u8]) -> Result<Ciphertext, CryptoError> {
    let mut salt = [0u8; KDF_SALT_SIZE];
    let mut nonce = [0u8; GCM_NONCE_SIZE];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut nonce);

    let mut key = derive_aes_key(secret, &salt)?;
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| CryptoError::AeadEncrypt);
    key.zeroize();

    let payload = cipher?
        .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::AeadEncrypt)?;

    Ciphertext::new(payload, salt, nonce)
}

/// Decrypt an envelope. Any mismatch in secret, salt, nonce, payload, or
/// associated data fails tag verification; no partial plaintext is ever
/// returned.
pub fn decrypt(
    ciphertext: &Ciphertext,
    secret: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let mut key = derive_aes_key(secret, ciphertext.salt())?;
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| CryptoError::AeadIntegrity);
    key.zeroize();

    let plaintext = cipher?
        .decrypt(
            Nonce::from_slice(ciphertext.nonce()),
            Payload { msg: ciphertext.payload(), aad },
        )
        .map_err(|_| CryptoError::AeadIntegrity)?;

    Ok(Zeroizing::new(plaintext))
}
