use thiserror::Error;

use pv_crypto::CryptoError;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("ciphertext carries no aes256_gcm_hkdf_sha256 variant")]
    MissingCiphertextField,

    #[error("invitation envelope does not involve this identity")]
    InvitationNotAddressed,

    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}
