use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("invalid public key prefix {0:#04x}: uncompressed keys start with 0x04")]
    InvalidKeyPrefix(u8),

    #[error("invalid signature length: expected 64 bytes, got {0}")]
    InvalidSignatureLength(usize),

    #[error("invalid recovery bit {0}: must be 0 or 1")]
    InvalidRecoveryBit(u8),

    #[error("public key carries no signature")]
    MissingSignature,

    #[error("peer prekey signature does not validate under the peer identity key")]
    PeerPreKeySignatureInvalid,

    #[error("no local prekey matches the one this payload was addressed to")]
    RecipientPreKeyMismatch,

    #[error("ECDSA operation failed: {0}")]
    Ecdsa(String),

    #[error("AEAD encryption failed")]
    AeadEncrypt,

    #[error("AEAD integrity failure: authentication tag mismatch")]
    AeadIntegrity,

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}
