//! pv_proto — Wire types, envelopes and serialisation for the Palaver
//! Protocol.
//!
//! On-wire envelopes are JSON with hex/base64 byte fields. Header bytes are
//! framed verbatim so the exact bytes bound as AEAD associated data are the
//! bytes that travel.
//!
//! # Modules
//! - `message`    — V1 envelope (direct per-message asymmetric encryption)
//! - `invitation` — invitations and sealed invitation envelopes
//! - `codec`      — framing and presence validation
//! - `topic`      — topic string formats
//! - `error`      — unified error type

pub mod codec;
pub mod error;
pub mod invitation;
pub mod message;
pub mod topic;

pub use error::ProtoError;
pub use invitation::{
    invite_dh_is_recipient, ConsentProof, Invitation, InvitationContext, InviteRole,
    OpenedInvitation, SealedInvitation, SealedInvitationHeader,
};
pub use message::{DecodedMessage, MessageHeader};
