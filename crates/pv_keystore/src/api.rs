//! Request/response types for the keystore surface.
//!
//! Every batched operation takes N requests and returns exactly N per-item
//! results; a malformed item never aborts its batch. The types are fully
//! typed: a request that constructs is a request that dispatches, so there
//! is no shape probing past this boundary.

use pv_crypto::{Ciphertext, KeyBundle};
use pv_proto::InvitationContext;

/// Direct (V1) encryption toward a peer bundle.
#[derive(Debug, Clone)]
pub struct EncryptV1Request {
    pub recipient: KeyBundle,
    pub payload: Vec<u8>,
    /// Encoded envelope header, bound as associated data.
    pub header_bytes: Vec<u8>,
}

/// Direct (V1) decryption.
#[derive(Debug, Clone)]
pub struct DecryptV1Request {
    pub payload: Ciphertext,
    pub peer_keys: KeyBundle,
    pub header_bytes: Vec<u8>,
    /// True when the local party originally sent this payload (reading own
    /// history), which flips the DH role used to re-derive the secret.
    pub is_sender: bool,
}

/// Topic-based (V2) encryption.
#[derive(Debug, Clone)]
pub struct EncryptV2Request {
    pub topic: String,
    pub payload: Vec<u8>,
    pub header_bytes: Vec<u8>,
}

/// Topic-based (V2) decryption.
#[derive(Debug, Clone)]
pub struct DecryptV2Request {
    pub topic: String,
    pub payload: Ciphertext,
    pub header_bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct EncryptResponse {
    pub ciphertext: Ciphertext,
}

#[derive(Debug, Clone)]
pub struct EncryptV2Response {
    pub ciphertext: Ciphertext,
    /// HMAC over the header bytes under the current rotating epoch key.
    /// Lets an untrusted push relay gate delivery without decryption keys.
    pub sender_hmac: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct DecryptResponse {
    pub payload: Vec<u8>,
}

/// A sealed invitation as it arrives from the transport: opaque payload
/// plus the envelope timestamp the relay stamped on it.
#[derive(Debug, Clone)]
pub struct SealedInviteEnvelope {
    pub timestamp_ns: u64,
    pub payload: Vec<u8>,
}

/// What callers get back about a conversation; key material stays inside.
#[derive(Debug, Clone)]
pub struct ConversationReference {
    pub topic: String,
    pub created_ns: u64,
    pub peer_address: String,
    pub context: Option<InvitationContext>,
}

/// Result of sealing a new invitation: the local conversation record plus
/// the serialized envelope to hand to the transport.
#[derive(Debug, Clone)]
pub struct CreateInviteResponse {
    pub conversation: ConversationReference,
    pub payload: Vec<u8>,
}

/// Which private key a `sign_digest` call uses. Key bytes never leave the
/// keystore; callers only ever name a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signer {
    IdentityKey,
    PreKey(usize),
}

/// One rotating push-signal key, tagged with its 30-day epoch.
#[derive(Debug, Clone)]
pub struct HmacKey {
    pub epoch: i64,
    pub key: [u8; 32],
}
