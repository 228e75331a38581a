use thiserror::Error;

use pv_crypto::CryptoError;
use pv_proto::ProtoError;

#[derive(Debug, Error)]
pub enum KeystoreError {
    #[error("unknown topic {0}: no invitation on record, sync invitations first")]
    UnknownTopic(String),

    #[error("invitation timestamp mismatch: header says {header_ns}ns, envelope says {envelope_ns}ns")]
    InvitationTimestampMismatch { header_ns: u64, envelope_ns: u64 },

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Proto(#[from] ProtoError),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}
