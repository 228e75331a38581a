//! Conversation records.
//!
//! The keystore's durable memory of a topic: created once when an
//! invitation is sealed or saved, read on every V2 encrypt/decrypt, never
//! mutated afterwards except for the one legal state transition.
//!
//! Lifecycle: `Uninitialized` (no record) → `Invited` (we sealed an
//! invitation locally, the peer may not have it yet) → `Active` (an
//! invitation for the topic came back through the transport, both sides
//! hold key material).

use serde::{Deserialize, Serialize};

use pv_proto::Invitation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    /// No record for the topic.
    Uninitialized,
    /// Local record exists, not yet confirmed received by the peer.
    Invited,
    /// Topic present with usable key material on both sides.
    Active,
}

/// Durable record that a topic's key material is known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicData {
    pub invitation: Invitation,
    pub created_ns: u64,
    pub peer_address: String,
    pub state: ConversationState,
}
