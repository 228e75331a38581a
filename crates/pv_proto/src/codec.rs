//! Wire codec: framing and presence validation.
//!
//! On-wire envelopes are JSON with hex/base64 byte fields. The transport
//! schema allows any field to be absent, so every envelope is parsed into a
//! wire struct whose fields are `Option`s and then converted into the typed
//! domain form; conversion fails with an error naming the missing field.
//! No shape probing happens anywhere past this boundary.
//!
//! Header bytes are framed verbatim inside their envelope: the exact bytes
//! bound as AEAD associated data are the bytes that travel, so a verifier
//! never has to re-canonicalise anything.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};

use pv_crypto::{Ciphertext, KeyBundle, PublicKey};

use crate::{
    error::ProtoError,
    invitation::{SealedInvitation, SealedInvitationHeader},
    message::MessageHeader,
};

// ── Wire structs ─────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
pub(crate) struct KeyBundleWire {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub identity_key: Option<PublicKey>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pre_key: Option<PublicKey>,
}

impl From<&KeyBundle> for KeyBundleWire {
    fn from(bundle: &KeyBundle) -> Self {
        Self {
            identity_key: Some(bundle.identity_key.clone()),
            pre_key: Some(bundle.pre_key.clone()),
        }
    }
}

fn bundle_from_wire(
    wire: KeyBundleWire,
    identity_field: &'static str,
    pre_key_field: &'static str,
) -> Result<KeyBundle, ProtoError> {
    Ok(KeyBundle {
        identity_key: wire
            .identity_key
            .ok_or(ProtoError::MissingField(identity_field))?,
        pre_key: wire.pre_key.ok_or(ProtoError::MissingField(pre_key_field))?,
    })
}

/// The ciphertext union: exactly one cipher variant is defined today.
#[derive(Serialize, Deserialize)]
pub(crate) struct CiphertextWire {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub aes256_gcm_hkdf_sha256: Option<Ciphertext>,
}

impl From<&Ciphertext> for CiphertextWire {
    fn from(ct: &Ciphertext) -> Self {
        Self { aes256_gcm_hkdf_sha256: Some(ct.clone()) }
    }
}

impl TryFrom<CiphertextWire> for Ciphertext {
    type Error = ProtoError;

    fn try_from(wire: CiphertextWire) -> Result<Self, ProtoError> {
        wire.aes256_gcm_hkdf_sha256
            .ok_or(ProtoError::MissingCiphertextField)
    }
}

#[derive(Serialize, Deserialize)]
struct MessageHeaderWire {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    sender: Option<KeyBundleWire>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    recipient: Option<KeyBundleWire>,
}

#[derive(Serialize, Deserialize)]
struct EnvelopeWire {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    header_bytes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    ciphertext: Option<CiphertextWire>,
}

#[derive(Serialize, Deserialize)]
struct SealedInvitationHeaderWire {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    sender: Option<KeyBundleWire>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    recipient: Option<KeyBundleWire>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    created_ns: Option<u64>,
}

// ── Message header ───────────────────────────────────────────────────────────

pub fn encode_message_header(header: &MessageHeader) -> Result<Vec<u8>, ProtoError> {
    let wire = MessageHeaderWire {
        sender: Some((&header.sender).into()),
        recipient: Some((&header.recipient).into()),
    };
    Ok(serde_json::to_vec(&wire)?)
}

pub fn decode_message_header(bytes: &[u8]) -> Result<MessageHeader, ProtoError> {
    let wire: MessageHeaderWire = serde_json::from_slice(bytes)?;
    let sender = bundle_from_wire(
        wire.sender.ok_or(ProtoError::MissingField("header.sender"))?,
        "header.sender.identity_key",
        "header.sender.pre_key",
    )?;
    let recipient = bundle_from_wire(
        wire.recipient
            .ok_or(ProtoError::MissingField("header.recipient"))?,
        "header.recipient.identity_key",
        "header.recipient.pre_key",
    )?;
    Ok(MessageHeader { sender, recipient })
}

// ── Envelope framing (message and sealed invitation share the shape) ────────

pub(crate) fn encode_envelope(
    header_bytes: &[u8],
    ciphertext: &Ciphertext,
) -> Result<Vec<u8>, ProtoError> {
    let wire = EnvelopeWire {
        header_bytes: Some(URL_SAFE_NO_PAD.encode(header_bytes)),
        ciphertext: Some(ciphertext.into()),
    };
    Ok(serde_json::to_vec(&wire)?)
}

pub(crate) fn decode_envelope(bytes: &[u8]) -> Result<(Vec<u8>, Ciphertext), ProtoError> {
    let wire: EnvelopeWire = serde_json::from_slice(bytes)?;
    let header_b64 = wire
        .header_bytes
        .ok_or(ProtoError::MissingField("header_bytes"))?;
    let header_bytes = URL_SAFE_NO_PAD
        .decode(header_b64)
        .map_err(|e| ProtoError::InvalidInput(format!("header_bytes: {e}")))?;
    let ciphertext = wire
        .ciphertext
        .ok_or(ProtoError::MissingField("ciphertext"))?
        .try_into()?;
    Ok((header_bytes, ciphertext))
}

// ── Sealed invitation header ─────────────────────────────────────────────────

pub fn encode_sealed_header(header: &SealedInvitationHeader) -> Result<Vec<u8>, ProtoError> {
    let wire = SealedInvitationHeaderWire {
        sender: Some((&header.sender).into()),
        recipient: Some((&header.recipient).into()),
        created_ns: Some(header.created_ns),
    };
    Ok(serde_json::to_vec(&wire)?)
}

pub fn decode_sealed_header(bytes: &[u8]) -> Result<SealedInvitationHeader, ProtoError> {
    let wire: SealedInvitationHeaderWire = serde_json::from_slice(bytes)?;
    let sender = bundle_from_wire(
        wire.sender.ok_or(ProtoError::MissingField("header.sender"))?,
        "header.sender.identity_key",
        "header.sender.pre_key",
    )?;
    let recipient = bundle_from_wire(
        wire.recipient
            .ok_or(ProtoError::MissingField("header.recipient"))?,
        "header.recipient.identity_key",
        "header.recipient.pre_key",
    )?;
    let created_ns = wire
        .created_ns
        .ok_or(ProtoError::MissingField("header.created_ns"))?;
    Ok(SealedInvitationHeader { sender, recipient, created_ns })
}

pub(crate) fn encode_sealed_invitation(sealed: &SealedInvitation) -> Result<Vec<u8>, ProtoError> {
    encode_envelope(&sealed.header_bytes, &sealed.ciphertext)
}

pub(crate) fn decode_sealed_invitation(bytes: &[u8]) -> Result<SealedInvitation, ProtoError> {
    let (header_bytes, ciphertext) = decode_envelope(bytes)?;
    Ok(SealedInvitation { header_bytes, ciphertext })
}
