//! End-to-end keystore flows: two identities exchanging invitations and
//! topic messages through nothing but the public keystore surface.

use std::collections::BTreeMap;

use pv_crypto::{kdf, PrivateKeyBundle};
use pv_keystore::{
    verify_sender_hmac, ConversationState, DecryptV1Request, DecryptV2Request, EncryptV1Request,
    EncryptV2Request, InMemoryPersistence, JobType, Keystore, KeystoreError, SealedInviteEnvelope,
    Signer,
};
use pv_proto::{invite_dh_is_recipient, topic, InvitationContext};

const CREATED_NS: u64 = 1_700_000_000_000_000_000;

/// Same identity, second handle. Simulates the bundle living on more than
/// one surface (keystore plus a test observer).
fn duplicate(bundle: &PrivateKeyBundle) -> PrivateKeyBundle {
    serde_json::from_slice(&serde_json::to_vec(bundle).unwrap()).unwrap()
}

async fn keystore(bundle: PrivateKeyBundle) -> Keystore {
    Keystore::open(bundle, Box::new(InMemoryPersistence::new()))
        .await
        .unwrap()
}

fn context(id: &str) -> InvitationContext {
    InvitationContext {
        conversation_id: id.to_string(),
        metadata: BTreeMap::new(),
    }
}

#[tokio::test]
async fn invite_is_deterministic_from_both_directions() {
    let alice = keystore(PrivateKeyBundle::generate().unwrap()).await;
    let bob = keystore(PrivateKeyBundle::generate().unwrap()).await;

    let from_alice = alice
        .create_invite(&bob.public_bundle(), CREATED_NS, Some(context("pact/1")), None)
        .await
        .unwrap();
    let from_bob = bob
        .create_invite(&alice.public_bundle(), CREATED_NS + 5, Some(context("pact/1")), None)
        .await
        .unwrap();

    assert_eq!(from_alice.conversation.topic, from_bob.conversation.topic);

    // A different context lands on a different topic.
    let other = alice
        .create_invite(&bob.public_bundle(), CREATED_NS, Some(context("pact/2")), None)
        .await
        .unwrap();
    assert_ne!(other.conversation.topic, from_alice.conversation.topic);
}

#[tokio::test]
async fn v2_message_flow() {
    let alice_bundle = PrivateKeyBundle::generate().unwrap();
    let bob_bundle = PrivateKeyBundle::generate().unwrap();
    let alice = keystore(duplicate(&alice_bundle)).await;
    let bob = keystore(duplicate(&bob_bundle)).await;

    // Alice seals; both sides ingest the envelope from the transport.
    let invite = alice
        .create_invite(&bob.public_bundle(), CREATED_NS, Some(context("pact/1")), None)
        .await
        .unwrap();
    let topic = invite.conversation.topic.clone();
    assert!(topic.starts_with("/xmtp/0/m-") && topic.ends_with("/proto"));

    let envelope = SealedInviteEnvelope {
        timestamp_ns: CREATED_NS,
        payload: invite.payload.clone(),
    };
    let saved = bob.save_invites(std::slice::from_ref(&envelope)).await;
    let bob_ref = saved[0].as_ref().unwrap();
    assert_eq!(bob_ref.topic, topic);
    assert_eq!(bob_ref.peer_address, alice.account_address());
    assert_eq!(bob.conversation_state(&topic).await, ConversationState::Active);

    // Alice's own copy flows back too and confirms her record.
    assert_eq!(alice.conversation_state(&topic).await, ConversationState::Invited);
    alice.save_invites(std::slice::from_ref(&envelope)).await[0]
        .as_ref()
        .unwrap();
    assert_eq!(alice.conversation_state(&topic).await, ConversationState::Active);

    // Topic messages flow both ways.
    let header_bytes = b"v2 header".to_vec();
    let encrypted = alice
        .encrypt_v2(&[EncryptV2Request {
            topic: topic.clone(),
            payload: b"hello bob".to_vec(),
            header_bytes: header_bytes.clone(),
        }])
        .await;
    let encrypted = encrypted[0].as_ref().unwrap();

    let decrypted = bob
        .decrypt_v2(&[DecryptV2Request {
            topic: topic.clone(),
            payload: encrypted.ciphertext.clone(),
            header_bytes: header_bytes.clone(),
        }])
        .await;
    assert_eq!(decrypted[0].as_ref().unwrap().payload, b"hello bob");

    // The relay can attribute the sender from exported rotating keys.
    let keys = bob
        .get_v2_conversation_hmac_keys(Some(std::slice::from_ref(&topic)))
        .await
        .unwrap();
    let keys = &keys[&topic];
    assert_eq!(keys.len(), 3);
    assert!(verify_sender_hmac(keys, &header_bytes, &encrypted.sender_hmac));

    // A key from two epochs ahead must not verify this HMAC.
    let secret = bob_bundle
        .shared_secret(
            &alice.public_bundle(),
            bob_bundle.pre_key().public_key(),
            invite_dh_is_recipient(bob.account_address(), alice.account_address()),
        )
        .unwrap();
    let addresses =
        topic::sorted_addresses(alice.account_address(), bob.account_address());
    let key_material = kdf::invite_key_material(&secret, &addresses).unwrap();
    let current = kdf::thirty_day_epoch(chrono::Utc::now().timestamp());
    let far_key = kdf::epoch_hmac_key(&key_material, current + 2, alice.account_address()).unwrap();
    let far_hmac = kdf::hmac_sha256(&far_key, &header_bytes).unwrap();
    assert!(!verify_sender_hmac(keys, &header_bytes, &far_hmac));

    // But the adjacent epochs are tolerated.
    let prev_key =
        kdf::epoch_hmac_key(&key_material, current - 1, alice.account_address()).unwrap();
    let prev_hmac = kdf::hmac_sha256(&prev_key, &header_bytes).unwrap();
    assert!(verify_sender_hmac(keys, &header_bytes, &prev_hmac));
}

#[tokio::test]
async fn unknown_topic_requires_invite_sync() {
    let alice = keystore(PrivateKeyBundle::generate().unwrap()).await;
    let results = alice
        .encrypt_v2(&[EncryptV2Request {
            topic: "/xmtp/0/m-ffff/proto".to_string(),
            payload: b"lost".to_vec(),
            header_bytes: vec![],
        }])
        .await;
    assert!(matches!(
        results[0],
        Err(KeystoreError::UnknownTopic(_))
    ));
}

#[tokio::test]
async fn batches_isolate_failures() {
    let alice = keystore(PrivateKeyBundle::generate().unwrap()).await;
    let bob = keystore(PrivateKeyBundle::generate().unwrap()).await;

    let good = alice
        .create_invite(&bob.public_bundle(), CREATED_NS, Some(context("pact/1")), None)
        .await
        .unwrap();

    let envelopes = vec![
        SealedInviteEnvelope { timestamp_ns: CREATED_NS, payload: good.payload.clone() },
        SealedInviteEnvelope { timestamp_ns: CREATED_NS, payload: b"not an envelope".to_vec() },
        SealedInviteEnvelope { timestamp_ns: CREATED_NS, payload: good.payload.clone() },
    ];
    let results = bob.save_invites(&envelopes).await;

    assert_eq!(results.len(), envelopes.len());
    assert!(results[0].is_ok());
    assert!(results[1].is_err());
    assert!(results[2].is_ok());
}

#[tokio::test]
async fn envelope_timestamp_must_match_header() {
    let alice = keystore(PrivateKeyBundle::generate().unwrap()).await;
    let bob = keystore(PrivateKeyBundle::generate().unwrap()).await;

    let invite = alice
        .create_invite(&bob.public_bundle(), CREATED_NS, None, None)
        .await
        .unwrap();
    let results = bob
        .save_invites(&[SealedInviteEnvelope {
            timestamp_ns: CREATED_NS + 1,
            payload: invite.payload,
        }])
        .await;
    assert!(matches!(
        results[0],
        Err(KeystoreError::InvitationTimestampMismatch { .. })
    ));
}

#[tokio::test]
async fn v1_batch_roundtrip() {
    let alice_bundle = PrivateKeyBundle::generate().unwrap();
    let bob_bundle = PrivateKeyBundle::generate().unwrap();
    let alice = keystore(duplicate(&alice_bundle)).await;
    let bob = keystore(duplicate(&bob_bundle)).await;

    let header_bytes = b"v1 header".to_vec();
    let encrypted = alice.encrypt_v1(&[EncryptV1Request {
        recipient: bob.public_bundle(),
        payload: b"direct".to_vec(),
        header_bytes: header_bytes.clone(),
    }]);
    let encrypted = encrypted[0].as_ref().unwrap();

    // Bob decrypts as recipient.
    let decrypted = bob.decrypt_v1(&[DecryptV1Request {
        payload: encrypted.ciphertext.clone(),
        peer_keys: alice.public_bundle(),
        header_bytes: header_bytes.clone(),
        is_sender: false,
    }]);
    assert_eq!(decrypted[0].as_ref().unwrap().payload, b"direct");

    // Alice re-reads her own sent message.
    let reread = alice.decrypt_v1(&[DecryptV1Request {
        payload: encrypted.ciphertext.clone(),
        peer_keys: bob.public_bundle(),
        header_bytes,
        is_sender: true,
    }]);
    assert_eq!(reread[0].as_ref().unwrap().payload, b"direct");
}

#[tokio::test]
async fn conversations_survive_reopen() {
    let bundle = PrivateKeyBundle::generate().unwrap();
    let bob = keystore(PrivateKeyBundle::generate().unwrap()).await;
    let backing = std::sync::Arc::new(InMemoryPersistence::new());

    let topic = {
        let alice = Keystore::open(duplicate(&bundle), Box::new(backing.clone()))
            .await
            .unwrap();
        let invite = alice
            .create_invite(&bob.public_bundle(), CREATED_NS, Some(context("pact/9")), None)
            .await
            .unwrap();
        invite.conversation.topic
    };

    let alice = Keystore::open(duplicate(&bundle), Box::new(backing))
        .await
        .unwrap();
    assert_eq!(alice.conversation_state(&topic).await, ConversationState::Invited);
    let results = alice
        .encrypt_v2(&[EncryptV2Request {
            topic,
            payload: b"still here".to_vec(),
            header_bytes: vec![],
        }])
        .await;
    assert!(results[0].is_ok());
}

#[tokio::test]
async fn sign_digest_uses_named_slots() {
    let bundle = PrivateKeyBundle::generate().unwrap();
    let identity_public = bundle.identity_key().public_key().clone();
    let prekey_public = bundle.pre_key().public_key().clone();
    let alice = keystore(bundle).await;

    let digest = kdf::sha256(b"auth challenge");
    let by_identity = alice.sign_digest(&digest, Signer::IdentityKey).unwrap();
    assert!(identity_public.verify(&by_identity, &digest));

    let by_prekey = alice.sign_digest(&digest, Signer::PreKey(0)).unwrap();
    assert!(prekey_public.verify(&by_prekey, &digest));

    assert!(matches!(
        alice.sign_digest(&digest, Signer::PreKey(7)),
        Err(KeystoreError::InvalidInput(_))
    ));
    assert!(matches!(
        alice.sign_digest(b"short", Signer::IdentityKey),
        Err(KeystoreError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn job_state_roundtrip() {
    let alice = keystore(PrivateKeyBundle::generate().unwrap()).await;
    assert_eq!(alice.get_last_run_ns(JobType::RefreshV2).unwrap(), None);
    alice.set_last_run_ns(JobType::RefreshV2, 42).unwrap();
    assert_eq!(alice.get_last_run_ns(JobType::RefreshV2).unwrap(), Some(42));
    assert_eq!(alice.get_last_run_ns(JobType::RefreshV1).unwrap(), None);
}
