//! The keystore orchestrator.
//!
//! Holds one private key bundle and the conversation store (topic →
//! [`TopicData`]), and turns the primitives underneath into the operations
//! the client layer batches against: V1/V2 encrypt and decrypt, invitation
//! sealing and saving, rotating push-signal HMAC keys, and raw digest
//! signing for the outer auth layer.
//!
//! # Batch isolation
//! Every batched operation returns exactly one result per request, each
//! independently ok or error. One malformed item never aborts its batch;
//! callers mark that message undecodable and keep going.
//!
//! # Concurrency
//! The primitives are pure, so any number of batch operations may run in
//! parallel. The only shared mutable state is the conversation store:
//! entries are merge-only and all same-topic writes serialize on the store
//! lock, so a lost-update race cannot drop a topic.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use pv_crypto::{aead, kdf, KeyBundle, PrivateKeyBundle, Signature};
use pv_proto::{
    invite_dh_is_recipient, topic, ConsentProof, Invitation, InvitationContext, InviteRole,
    SealedInvitation,
};

use crate::{
    api::{
        ConversationReference, CreateInviteResponse, DecryptResponse, DecryptV1Request,
        DecryptV2Request, EncryptResponse, EncryptV1Request, EncryptV2Request, EncryptV2Response,
        HmacKey, SealedInviteEnvelope, Signer,
    },
    conversation::{ConversationState, TopicData},
    error::KeystoreError,
    jobs::JobType,
    persistence::Persistence,
};

const CONVERSATIONS_KEY: &str = "v2/conversations";

/// One identity's keystore. Share behind an `Arc`; all methods take `&self`.
pub struct Keystore {
    bundle: PrivateKeyBundle,
    account_address: String,
    conversations: RwLock<HashMap<String, TopicData>>,
    persistence: Box<dyn Persistence>,
}

impl Keystore {
    /// Open a keystore, restoring any conversation records the persistence
    /// layer holds from earlier sessions.
    pub async fn open(
        bundle: PrivateKeyBundle,
        persistence: Box<dyn Persistence>,
    ) -> Result<Self, KeystoreError> {
        let conversations: HashMap<String, TopicData> =
            match persistence.get(CONVERSATIONS_KEY)? {
                Some(bytes) => serde_json::from_slice(&bytes)?,
                None => HashMap::new(),
            };
        debug!(restored = conversations.len(), "keystore opened");
        let account_address = bundle.public_bundle().wallet_address();
        Ok(Self {
            bundle,
            account_address,
            conversations: RwLock::new(conversations),
            persistence,
        })
    }

    pub fn account_address(&self) -> &str {
        &self.account_address
    }

    pub fn public_bundle(&self) -> KeyBundle {
        self.bundle.public_bundle()
    }

    // ── V1: direct peer-bundle encryption ───────────────────────────────────

    pub fn encrypt_v1(
        &self,
        requests: &[EncryptV1Request],
    ) -> Vec<Result<EncryptResponse, KeystoreError>> {
        debug!(count = requests.len(), "encrypt_v1 batch");
        requests
            .iter()
            .enumerate()
            .map(|(i, req)| self.logged("encrypt_v1", i, self.encrypt_v1_item(req)))
            .collect()
    }

    fn encrypt_v1_item(
        &self,
        req: &EncryptV1Request,
    ) -> Result<EncryptResponse, KeystoreError> {
        let secret = self.bundle.shared_secret(
            &req.recipient,
            self.bundle.pre_key().public_key(),
            false,
        )?;
        let ciphertext = aead::encrypt(&req.payload, &secret, &req.header_bytes)?;
        Ok(EncryptResponse { ciphertext })
    }

    pub fn decrypt_v1(
        &self,
        requests: &[DecryptV1Request],
    ) -> Vec<Result<DecryptResponse, KeystoreError>> {
        debug!(count = requests.len(), "decrypt_v1 batch");
        requests
            .iter()
            .enumerate()
            .map(|(i, req)| self.logged("decrypt_v1", i, self.decrypt_v1_item(req)))
            .collect()
    }

    fn decrypt_v1_item(
        &self,
        req: &DecryptV1Request,
    ) -> Result<DecryptResponse, KeystoreError> {
        let secret = self.bundle.shared_secret(
            &req.peer_keys,
            self.bundle.pre_key().public_key(),
            !req.is_sender,
        )?;
        let payload = aead::decrypt(&req.payload, &secret, &req.header_bytes)?;
        Ok(DecryptResponse { payload: payload.to_vec() })
    }

    // ── V2: invitations ─────────────────────────────────────────────────────

    /// Seal a new invitation toward `recipient` and record the topic
    /// locally.
    ///
    /// Topic and key material are derived from the direction-normalized
    /// invitation secret, so the peer inviting us to the same
    /// `(identity pair, context)` lands on the identical topic string and
    /// key material.
    pub async fn create_invite(
        &self,
        recipient: &KeyBundle,
        created_ns: u64,
        context: Option<InvitationContext>,
        consent_proof: Option<ConsentProof>,
    ) -> Result<CreateInviteResponse, KeystoreError> {
        let peer_address = recipient.wallet_address();
        let secret = self.bundle.shared_secret(
            recipient,
            self.bundle.pre_key().public_key(),
            invite_dh_is_recipient(&self.account_address, &peer_address),
        )?;

        let addresses = topic::sorted_addresses(&self.account_address, &peer_address);
        let conversation_id = context
            .as_ref()
            .map(|c| c.conversation_id.as_str())
            .unwrap_or("");
        let digest = kdf::invite_topic_digest(&secret, conversation_id, &addresses)?;
        let topic = topic::v2_message_topic(&digest);
        let key_material = kdf::invite_key_material(&secret, &addresses)?;

        let invitation = Invitation {
            topic: topic.clone(),
            key_material,
            context,
            consent_proof,
        };
        let sealed = SealedInvitation::seal(&self.bundle, recipient, &invitation, created_ns)?;
        let payload = sealed.to_bytes()?;

        let conversation = self
            .record_topic(TopicData {
                invitation,
                created_ns,
                peer_address,
                state: ConversationState::Invited,
            })
            .await?;
        debug!(topic = %conversation.topic, "invitation sealed");
        Ok(CreateInviteResponse { conversation, payload })
    }

    /// Unseal and record a batch of invitation envelopes from the
    /// transport, own sealed invitations included.
    pub async fn save_invites(
        &self,
        envelopes: &[SealedInviteEnvelope],
    ) -> Vec<Result<ConversationReference, KeystoreError>> {
        debug!(count = envelopes.len(), "save_invites batch");
        let mut results = Vec::with_capacity(envelopes.len());
        for (i, envelope) in envelopes.iter().enumerate() {
            results.push(self.logged("save_invites", i, self.save_invite(envelope).await));
        }
        results
    }

    async fn save_invite(
        &self,
        envelope: &SealedInviteEnvelope,
    ) -> Result<ConversationReference, KeystoreError> {
        let sealed = SealedInvitation::from_bytes(&envelope.payload)?;
        let opened = sealed.open(&self.bundle)?;

        if opened.header.created_ns != envelope.timestamp_ns {
            return Err(KeystoreError::InvitationTimestampMismatch {
                header_ns: opened.header.created_ns,
                envelope_ns: envelope.timestamp_ns,
            });
        }

        let peer_bundle = match opened.role {
            InviteRole::Recipient => &opened.header.sender,
            InviteRole::Sender => &opened.header.recipient,
        };
        self.record_topic(TopicData {
            invitation: opened.invitation,
            created_ns: opened.header.created_ns,
            peer_address: peer_bundle.wallet_address(),
            state: ConversationState::Active,
        })
        .await
    }

    /// Merge-only insert, deduplicated by topic. First write wins; a saved
    /// invitation upgrades a locally-created record to `Active`. Same-topic
    /// writes serialize on the store lock.
    async fn record_topic(
        &self,
        data: TopicData,
    ) -> Result<ConversationReference, KeystoreError> {
        let topic = data.invitation.topic.clone();
        let mut map = self.conversations.write().await;
        match map.entry(topic.clone()) {
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(data);
            }
            std::collections::hash_map::Entry::Occupied(mut slot) => {
                if data.state == ConversationState::Active
                    && slot.get().state == ConversationState::Invited
                {
                    slot.get_mut().state = ConversationState::Active;
                }
            }
        }
        let reference = Self::reference(&topic, &map[&topic]);
        self.persist_conversations(&map)?;
        Ok(reference)
    }

    fn persist_conversations(
        &self,
        map: &HashMap<String, TopicData>,
    ) -> Result<(), KeystoreError> {
        self.persistence
            .set(CONVERSATIONS_KEY, serde_json::to_vec(map)?)
    }

    fn reference(topic: &str, data: &TopicData) -> ConversationReference {
        ConversationReference {
            topic: topic.to_string(),
            created_ns: data.created_ns,
            peer_address: data.peer_address.clone(),
            context: data.invitation.context.clone(),
        }
    }

    // ── V2: topic-based encryption ──────────────────────────────────────────

    pub async fn encrypt_v2(
        &self,
        requests: &[EncryptV2Request],
    ) -> Vec<Result<EncryptV2Response, KeystoreError>> {
        debug!(count = requests.len(), "encrypt_v2 batch");
        let mut results = Vec::with_capacity(requests.len());
        for (i, req) in requests.iter().enumerate() {
            results.push(self.logged("encrypt_v2", i, self.encrypt_v2_item(req).await));
        }
        results
    }

    async fn encrypt_v2_item(
        &self,
        req: &EncryptV2Request,
    ) -> Result<EncryptV2Response, KeystoreError> {
        let key_material = self.key_material_for(&req.topic).await?;
        // Fresh salt and nonce per message: static key material, but every
        // envelope gets its own derived AES key.
        let ciphertext = aead::encrypt(&req.payload, &key_material, &req.header_bytes)?;

        let epoch = kdf::thirty_day_epoch(Utc::now().timestamp());
        let hmac_key = kdf::epoch_hmac_key(&key_material, epoch, &self.account_address)?;
        let sender_hmac = kdf::hmac_sha256(&hmac_key, &req.header_bytes)?.to_vec();

        Ok(EncryptV2Response { ciphertext, sender_hmac })
    }

    pub async fn decrypt_v2(
        &self,
        requests: &[DecryptV2Request],
    ) -> Vec<Result<DecryptResponse, KeystoreError>> {
        debug!(count = requests.len(), "decrypt_v2 batch");
        let mut results = Vec::with_capacity(requests.len());
        for (i, req) in requests.iter().enumerate() {
            results.push(self.logged("decrypt_v2", i, self.decrypt_v2_item(req).await));
        }
        results
    }

    async fn decrypt_v2_item(
        &self,
        req: &DecryptV2Request,
    ) -> Result<DecryptResponse, KeystoreError> {
        let key_material = self.key_material_for(&req.topic).await?;
        let payload = aead::decrypt(&req.payload, &key_material, &req.header_bytes)?;
        Ok(DecryptResponse { payload: payload.to_vec() })
    }

    async fn key_material_for(&self, topic: &str) -> Result<[u8; 32], KeystoreError> {
        let map = self.conversations.read().await;
        map.get(topic)
            .map(|data| data.invitation.key_material)
            .ok_or_else(|| KeystoreError::UnknownTopic(topic.to_string()))
    }

    // ── Rotating push-signal keys ───────────────────────────────────────────

    /// Export per-topic HMAC keys for the previous, current and next 30-day
    /// epoch, derived from the conversation peer so a verifier can check
    /// incoming sender HMACs across epoch boundaries without ever holding
    /// key material.
    pub async fn get_v2_conversation_hmac_keys(
        &self,
        topics: Option<&[String]>,
    ) -> Result<HashMap<String, Vec<HmacKey>>, KeystoreError> {
        let epoch = kdf::thirty_day_epoch(Utc::now().timestamp());
        let map = self.conversations.read().await;
        let mut out = HashMap::new();
        for (topic, data) in map.iter() {
            if let Some(filter) = topics {
                if !filter.iter().any(|t| t == topic) {
                    continue;
                }
            }
            let mut values = Vec::with_capacity(3);
            for e in (epoch - 1)..=(epoch + 1) {
                values.push(HmacKey {
                    epoch: e,
                    key: kdf::epoch_hmac_key(
                        &data.invitation.key_material,
                        e,
                        &data.peer_address,
                    )?,
                });
            }
            out.insert(topic.clone(), values);
        }
        Ok(out)
    }

    // ── Signing and state ───────────────────────────────────────────────────

    /// Sign a 32-byte digest with a named key slot. Key bytes never leave
    /// the keystore.
    pub fn sign_digest(
        &self,
        digest: &[u8],
        signer: Signer,
    ) -> Result<Signature, KeystoreError> {
        if digest.len() != 32 {
            return Err(KeystoreError::InvalidInput(format!(
                "digest must be 32 bytes, got {}",
                digest.len()
            )));
        }
        let key = match signer {
            Signer::IdentityKey => self.bundle.identity_key(),
            Signer::PreKey(index) => self.bundle.pre_keys().get(index).ok_or_else(|| {
                KeystoreError::InvalidInput(format!("prekey index {index} out of range"))
            })?,
        };
        Ok(key.sign(digest)?)
    }

    pub async fn conversation_state(&self, topic: &str) -> ConversationState {
        self.conversations
            .read()
            .await
            .get(topic)
            .map(|data| data.state)
            .unwrap_or(ConversationState::Uninitialized)
    }

    // ── Job bookkeeping ─────────────────────────────────────────────────────

    pub fn get_last_run_ns(&self, job: JobType) -> Result<Option<u64>, KeystoreError> {
        match self.persistence.get(job.storage_key())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn set_last_run_ns(&self, job: JobType, last_run_ns: u64) -> Result<(), KeystoreError> {
        self.persistence
            .set(job.storage_key(), serde_json::to_vec(&last_run_ns)?)
    }

    fn logged<T>(
        &self,
        op: &'static str,
        item: usize,
        result: Result<T, KeystoreError>,
    ) -> Result<T, KeystoreError> {
        if let Err(ref error) = result {
            warn!(op, item, %error, "batch item failed");
        }
        result
    }
}

/// Relay-side check: does `sender_hmac` verify under any of the exported
/// rotating keys for this topic?
pub fn verify_sender_hmac(keys: &[HmacKey], header_bytes: &[u8], sender_hmac: &[u8]) -> bool {
    keys.iter().any(|k| {
        kdf::hmac_sha256(&k.key, header_bytes)
            .map(|expected| expected.as_slice() == sender_hmac)
            .unwrap_or(false)
    })
}
