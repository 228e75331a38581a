//! Conversation invitations and their sealed envelopes.
//!
//! An invitation carries everything a party needs to join a topic: the
//! deterministic topic string and the symmetric key material every later
//! message on that topic is encrypted under. The sealed form encrypts the
//! invitation directly under the triple-DH secret between the two identity
//! bundles (not under the key material it transports), with the envelope
//! header bound as associated data, so only sender and recipient can unseal
//! it and neither can quietly re-address it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use pv_crypto::{aead, encoding, Ciphertext, KeyBundle, PrivateKeyBundle, Signature};

use crate::{codec, error::ProtoError};

/// Caller-supplied conversation coordinates: a stable id plus free-form
/// metadata, both opaque to the crypto core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvitationContext {
    pub conversation_id: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// Proof that the peer consented to contact, produced and checked by an
/// outer layer; carried opaquely here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentProof {
    pub signature: Signature,
    pub timestamp_ms: u64,
}

/// The cleartext invitation body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invitation {
    pub topic: String,
    #[serde(with = "encoding::hex_array")]
    pub key_material: [u8; 32],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<InvitationContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consent_proof: Option<ConsentProof>,
}

/// Cleartext header of a sealed invitation.
#[derive(Debug, Clone)]
pub struct SealedInvitationHeader {
    pub sender: KeyBundle,
    pub recipient: KeyBundle,
    pub created_ns: u64,
}

/// An invitation encrypted for exactly two parties.
#[derive(Debug, Clone)]
pub struct SealedInvitation {
    pub(crate) header_bytes: Vec<u8>,
    pub(crate) ciphertext: Ciphertext,
}

/// Which side of the conversation the local identity is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InviteRole {
    Sender,
    Recipient,
}

/// A successfully unsealed invitation.
#[derive(Debug)]
pub struct OpenedInvitation {
    pub header: SealedInvitationHeader,
    pub invitation: Invitation,
    pub role: InviteRole,
}

/// DH ordering role for invitation secrets.
///
/// The party with the lower wallet address takes the sender ordering,
/// regardless of who actually sends the envelope. This is what makes the
/// invitation secret, and everything derived from it (topic, key material),
/// come out identical from both directions.
pub fn invite_dh_is_recipient(my_address: &str, peer_address: &str) -> bool {
    my_address > peer_address
}

impl SealedInvitation {
    /// Seal `invitation` from `sender` to `recipient`.
    pub fn seal(
        sender: &PrivateKeyBundle,
        recipient: &KeyBundle,
        invitation: &Invitation,
        created_ns: u64,
    ) -> Result<Self, ProtoError> {
        let header = SealedInvitationHeader {
            sender: sender.public_bundle(),
            recipient: recipient.clone(),
            created_ns,
        };
        let header_bytes = codec::encode_sealed_header(&header)?;
        let my_address = header.sender.wallet_address();
        let secret = sender.shared_secret(
            recipient,
            sender.pre_key().public_key(),
            invite_dh_is_recipient(&my_address, &recipient.wallet_address()),
        )?;
        let ciphertext = aead::encrypt(&serde_json::to_vec(invitation)?, &secret, &header_bytes)?;
        Ok(Self { header_bytes, ciphertext })
    }

    /// Unseal with the local bundle, whichever side it is.
    ///
    /// The local role falls out of comparing the header's bundles against
    /// our own; an envelope naming neither side fails before any key
    /// agreement runs.
    pub fn open(&self, local: &PrivateKeyBundle) -> Result<OpenedInvitation, ProtoError> {
        let header = self.header()?;
        let me = local.public_bundle();

        let (peer, my_header_bundle, role) = if header.recipient.identity_key.matches(&me.identity_key)
        {
            (&header.sender, &header.recipient, InviteRole::Recipient)
        } else if header.sender.identity_key.matches(&me.identity_key) {
            (&header.recipient, &header.sender, InviteRole::Sender)
        } else {
            return Err(ProtoError::InvitationNotAddressed);
        };

        let secret = local.shared_secret(
            peer,
            &my_header_bundle.pre_key,
            invite_dh_is_recipient(&my_header_bundle.wallet_address(), &peer.wallet_address()),
        )?;
        let plain = aead::decrypt(&self.ciphertext, &secret, &self.header_bytes)?;
        let invitation: Invitation = serde_json::from_slice(&plain)?;

        Ok(OpenedInvitation { header, invitation, role })
    }

    /// Parse the cleartext header without touching the ciphertext.
    pub fn header(&self) -> Result<SealedInvitationHeader, ProtoError> {
        codec::decode_sealed_header(&self.header_bytes)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtoError> {
        codec::encode_sealed_invitation(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtoError> {
        codec::decode_sealed_invitation(bytes)
    }
}
