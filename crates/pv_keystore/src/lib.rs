//! pv_keystore — Keystore orchestrator for the Palaver Protocol.
//!
//! Owns one identity's private key bundle and the per-conversation key
//! material, and exposes the batched operations the client layer drives:
//! V1/V2 encryption, invitation sealing and saving, rotating push-signal
//! HMAC keys, raw digest signing, and job bookkeeping. Storage goes through
//! an abstract, value-encrypting persistence boundary; no engine is baked
//! in.

pub mod api;
pub mod conversation;
pub mod error;
pub mod jobs;
pub mod keystore;
pub mod persistence;

pub use api::{
    ConversationReference, CreateInviteResponse, DecryptResponse, DecryptV1Request,
    DecryptV2Request, EncryptResponse, EncryptV1Request, EncryptV2Request, EncryptV2Response,
    HmacKey, SealedInviteEnvelope, Signer,
};
pub use conversation::{ConversationState, TopicData};
pub use error::KeystoreError;
pub use jobs::JobType;
pub use keystore::{verify_sender_hmac, Keystore};
pub use persistence::{EncryptedPersistence, InMemoryPersistence, Persistence};
