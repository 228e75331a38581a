//! V1 message envelope: direct per-message asymmetric encryption between
//! two key bundles.
//!
//! Stateless: each call derives the shared secret fresh from the two
//! bundles. The encoded header is bound as associated data, so tampering
//! with sender or recipient identity invalidates the whole envelope even
//! though the header itself travels in the clear.
//!
//! Failure policy: structural problems (missing fields) are construction
//! errors naming the field; an AEAD failure marks the message undecodable.
//! Neither ever aborts the caller's surrounding batch or stream.

use zeroize::Zeroizing;

use pv_crypto::{aead, KeyBundle, PrivateKeyBundle};

use crate::{codec, error::ProtoError};

/// Cleartext envelope header binding the two parties.
#[derive(Debug, Clone)]
pub struct MessageHeader {
    pub sender: KeyBundle,
    pub recipient: KeyBundle,
}

/// A decoded V1 message: the parsed header plus the plaintext.
#[derive(Debug)]
pub struct DecodedMessage {
    pub header: MessageHeader,
    pub payload: Zeroizing<Vec<u8>>,
}

/// Encrypt `plaintext` from `sender` to `recipient` and frame the envelope.
pub fn encode(
    sender: &PrivateKeyBundle,
    recipient: &KeyBundle,
    plaintext: &[u8],
) -> Result<Vec<u8>, ProtoError> {
    let header = MessageHeader {
        sender: sender.public_bundle(),
        recipient: recipient.clone(),
    };
    let header_bytes = codec::encode_message_header(&header)?;
    let secret = sender.shared_secret(recipient, sender.pre_key().public_key(), false)?;
    let ciphertext = aead::encrypt(plaintext, &secret, &header_bytes)?;
    codec::encode_envelope(&header_bytes, &ciphertext)
}

/// Parse and decrypt an envelope addressed to `recipient`.
///
/// The header must name one of the recipient's prekeys; a message addressed
/// to a foreign prekey fails with `RecipientPreKeyMismatch` before any
/// decryption is attempted.
pub fn decode(recipient: &PrivateKeyBundle, bytes: &[u8]) -> Result<DecodedMessage, ProtoError> {
    let (header_bytes, ciphertext) = codec::decode_envelope(bytes)?;
    let header = codec::decode_message_header(&header_bytes)?;

    let secret = recipient.shared_secret(&header.sender, &header.recipient.pre_key, true)?;
    let payload = aead::decrypt(&ciphertext, &secret, &header_bytes)?;
    Ok(DecodedMessage { header, payload })
}
