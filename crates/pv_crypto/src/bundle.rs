//! Key bundles and the trust chain.
//!
//! A bundle pairs a long-lived identity key with a rotatable prekey; the
//! identity key countersigns sha256 of the prekey bytes. That one signature
//! authorizes the prekey for any number of key agreements with no further
//! owner interaction. The identity key itself may in turn be countersigned
//! by a blockchain wallet, binding the protocol identity to an
//! externally-owned account.
//!
//! Key agreement is a triple-DH variant: the classic ephemeral sender key is
//! replaced by the sender's long-term prekey. Both sides compute the same
//! three shared points (with swapped labels) and concatenate them, so no
//! extra round trip is needed to agree on a secret. The trade-off is no
//! per-message forward secrecy at this layer; deployed peers depend on the
//! exact construction, so it is part of the wire protocol.

use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::{
    aead::{self, Ciphertext},
    encoding,
    error::CryptoError,
    kdf::sha256,
    keys::{PrivateKey, PublicKey, Signature},
};

// ── Public bundle ────────────────────────────────────────────────────────────

/// The public half a peer publishes: identity key plus current prekey.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyBundle {
    pub identity_key: PublicKey,
    pub pre_key: PublicKey,
}

impl KeyBundle {
    /// Enforce the trust chain: the prekey must carry a countersignature by
    /// the identity key over sha256 of the prekey bytes.
    pub fn validate(&self) -> Result<(), CryptoError> {
        if self.identity_key.verify_key(&self.pre_key) {
            Ok(())
        } else {
            Err(CryptoError::PeerPreKeySignatureInvalid)
        }
    }

    /// The account this bundle belongs to. When the identity key is
    /// wallet-countersigned, that is the wallet's address, recovered from
    /// the signature; otherwise the identity key stands for itself.
    pub fn wallet_address(&self) -> String {
        self.recover_wallet_address()
            .unwrap_or_else(|_| self.identity_key.ethereum_address())
    }

    /// Strict form of [`KeyBundle::wallet_address`]: requires the wallet
    /// countersignature and a successful recovery.
    pub fn recover_wallet_address(&self) -> Result<String, CryptoError> {
        let sig = self
            .identity_key
            .signature()
            .ok_or(CryptoError::MissingSignature)?;
        let digest = sha256(self.identity_key.bytes());
        sig.recover_public_key(&digest)
            .map(|key| key.ethereum_address())
            .ok_or_else(|| CryptoError::Ecdsa("wallet signature recovery failed".into()))
    }

    /// Byte-wise comparison of both keys, countersignatures ignored.
    pub fn matches(&self, other: &KeyBundle) -> bool {
        self.identity_key.matches(&other.identity_key) && self.pre_key.matches(&other.pre_key)
    }
}

/// True when `identity_key` is countersigned by the wallet at `address`.
/// The wallet's public key is recovered from the signature, never shipped.
pub fn verify_wallet_binding(identity_key: &PublicKey, address: &str) -> Result<bool, CryptoError> {
    let sig = identity_key.signature().ok_or(CryptoError::MissingSignature)?;
    let digest = sha256(identity_key.bytes());
    Ok(sig
        .recover_public_key(&digest)
        .map(|key| key.ethereum_address().eq_ignore_ascii_case(address))
        .unwrap_or(false))
}

// ── Wallet boundary ──────────────────────────────────────────────────────────

/// The only door wallet interaction enters through. Real deployments hand
/// this to a wallet connector; tests and single-process tools use
/// [`LocalWallet`].
pub trait WalletSigner {
    fn sign_digest(&self, digest: &[u8; 32]) -> Result<Signature, CryptoError>;
}

/// In-process signer backed by a raw account key.
pub struct LocalWallet {
    key: PrivateKey,
}

impl LocalWallet {
    pub fn generate() -> Self {
        Self { key: PrivateKey::generate() }
    }

    pub fn address(&self) -> String {
        self.key.public_key().ethereum_address()
    }
}

impl WalletSigner for LocalWallet {
    fn sign_digest(&self, digest: &[u8; 32]) -> Result<Signature, CryptoError> {
        self.key.sign(digest)
    }
}

// ── Private bundle ───────────────────────────────────────────────────────────

/// The private half: identity key plus every prekey still usable for
/// decryption. Index 0 is the current prekey; older ones stay so payloads
/// addressed to a rotated-out prekey keep decrypting.
///
/// Invariant: `pre_keys` is never empty, enforced for deserialized bundles
/// too.
#[derive(Serialize, Deserialize)]
#[serde(try_from = "PrivateKeyBundleRepr")]
pub struct PrivateKeyBundle {
    identity_key: PrivateKey,
    pre_keys: Vec<PrivateKey>,
}

#[derive(Deserialize)]
struct PrivateKeyBundleRepr {
    identity_key: PrivateKey,
    pre_keys: Vec<PrivateKey>,
}

impl TryFrom<PrivateKeyBundleRepr> for PrivateKeyBundle {
    type Error = CryptoError;

    fn try_from(repr: PrivateKeyBundleRepr) -> Result<Self, CryptoError> {
        if repr.pre_keys.is_empty() {
            return Err(CryptoError::InvalidInput("bundle carries no prekeys".into()));
        }
        Ok(Self {
            identity_key: repr.identity_key,
            pre_keys: repr.pre_keys,
        })
    }
}

impl PrivateKeyBundle {
    /// Two fresh key pairs, prekey countersigned by the identity key.
    pub fn generate() -> Result<Self, CryptoError> {
        let identity_key = PrivateKey::generate();
        let mut pre_key = PrivateKey::generate();
        let sig = identity_key.sign(&sha256(pre_key.public_key().bytes()))?;
        pre_key.set_public_signature(sig);
        Ok(Self { identity_key, pre_keys: vec![pre_key] })
    }

    pub fn identity_key(&self) -> &PrivateKey {
        &self.identity_key
    }

    /// The current prekey. The bundle invariant keeps `pre_keys` non-empty.
    pub fn pre_key(&self) -> &PrivateKey {
        &self.pre_keys[0]
    }

    pub fn pre_keys(&self) -> &[PrivateKey] {
        &self.pre_keys
    }

    /// Countersign the identity key with a wallet, binding this bundle to
    /// the wallet's account.
    pub fn bind_to_wallet(&mut self, wallet: &dyn WalletSigner) -> Result<(), CryptoError> {
        let digest = sha256(self.identity_key.public_key().bytes());
        let sig = wallet.sign_digest(&digest)?;
        self.identity_key.set_public_signature(sig);
        Ok(())
    }

    /// Install a fresh prekey at index 0. Old prekeys are kept for decrypt;
    /// new agreements use the new one.
    pub fn rotate_pre_key(&mut self) -> Result<&PublicKey, CryptoError> {
        let mut fresh = PrivateKey::generate();
        let sig = self.identity_key.sign(&sha256(fresh.public_key().bytes()))?;
        fresh.set_public_signature(sig);
        self.pre_keys.insert(0, fresh);
        Ok(self.pre_keys[0].public_key())
    }

    /// The private prekey whose public half matches `pre_key`, if any.
    pub fn find_pre_key(&self, pre_key: &PublicKey) -> Option<&PrivateKey> {
        self.pre_keys
            .iter()
            .find(|k| k.public_key().matches(pre_key))
    }

    pub fn public_bundle(&self) -> KeyBundle {
        KeyBundle {
            identity_key: self.identity_key.public_key().clone(),
            pre_key: self.pre_key().public_key().clone(),
        }
    }

    /// Triple-DH shared secret against a peer bundle.
    ///
    /// `my_pre_key` selects which local prekey participates (the current one
    /// for new agreements, the addressed one when decrypting). The peer's
    /// prekey countersignature is validated before any DH is computed.
    ///
    /// Symmetry: A deriving as sender against B and B deriving as recipient
    /// against A produce the same three points and hence identical secrets.
    pub fn shared_secret(
        &self,
        peer: &KeyBundle,
        my_pre_key: &PublicKey,
        is_recipient: bool,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        peer.validate()?;
        let pre_key = self
            .find_pre_key(my_pre_key)
            .ok_or(CryptoError::RecipientPreKeyMismatch)?;

        let (dh1, dh2) = if is_recipient {
            (
                pre_key.shared_secret_point(&peer.identity_key)?,
                self.identity_key.shared_secret_point(&peer.pre_key)?,
            )
        } else {
            (
                self.identity_key.shared_secret_point(&peer.pre_key)?,
                pre_key.shared_secret_point(&peer.identity_key)?,
            )
        };
        let dh3 = pre_key.shared_secret_point(&peer.pre_key)?;

        let mut secret = Zeroizing::new(Vec::with_capacity(dh1.len() * 3));
        secret.extend_from_slice(&dh1);
        secret.extend_from_slice(&dh2);
        secret.extend_from_slice(&dh3);
        Ok(secret)
    }
}

impl std::fmt::Debug for PrivateKeyBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKeyBundle")
            .field("identity_key", &self.identity_key)
            .field("pre_keys", &self.pre_keys.len())
            .finish()
    }
}

// ── Wallet-encrypted export ──────────────────────────────────────────────────

/// A private bundle sealed for backup under a wallet signature.
///
/// `wallet_pre_key` is random and public; the AEAD secret is the wallet's
/// signature over sha256 of it. Only the wallet holder can reproduce that
/// signature, so only the wallet holder can open the export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedPrivateKeyBundle {
    #[serde(with = "encoding::hex_array")]
    pub wallet_pre_key: [u8; 32],
    pub ciphertext: Ciphertext,
}

impl PrivateKeyBundle {
    pub fn encrypt_to_wallet(
        &self,
        wallet: &dyn WalletSigner,
    ) -> Result<EncryptedPrivateKeyBundle, CryptoError> {
        let mut wallet_pre_key = [0u8; 32];
        OsRng.fill_bytes(&mut wallet_pre_key);

        let sig = wallet.sign_digest(&sha256(&wallet_pre_key))?;
        let plain = Zeroizing::new(
            serde_json::to_vec(self)
                .map_err(|e| CryptoError::InvalidInput(e.to_string()))?,
        );
        let ciphertext = aead::encrypt(&plain, sig.bytes(), &wallet_pre_key)?;
        Ok(EncryptedPrivateKeyBundle { wallet_pre_key, ciphertext })
    }

    pub fn decrypt_from_wallet(
        sealed: &EncryptedPrivateKeyBundle,
        wallet: &dyn WalletSigner,
    ) -> Result<Self, CryptoError> {
        let sig = wallet.sign_digest(&sha256(&sealed.wallet_pre_key))?;
        let plain = aead::decrypt(&sealed.ciphertext, sig.bytes(), &sealed.wallet_pre_key)?;
        serde_json::from_slice(&plain).map_err(|e| CryptoError::InvalidInput(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_bundle_validates() {
        let bundle = PrivateKeyBundle::generate().unwrap();
        bundle.public_bundle().validate().unwrap();
    }

    #[test]
    fn secret_is_symmetric() {
        let alice = PrivateKeyBundle::generate().unwrap();
        let bob = PrivateKeyBundle::generate().unwrap();

        let a_to_b = alice
            .shared_secret(&bob.public_bundle(), alice.pre_key().public_key(), false)
            .unwrap();
        let b_from_a = bob
            .shared_secret(&alice.public_bundle(), bob.pre_key().public_key(), true)
            .unwrap();

        assert_eq!(a_to_b, b_from_a);
        assert_eq!(a_to_b.len(), 3 * 65);
    }

    #[test]
    fn role_flags_must_complement() {
        let alice = PrivateKeyBundle::generate().unwrap();
        let bob = PrivateKeyBundle::generate().unwrap();

        let a = alice
            .shared_secret(&bob.public_bundle(), alice.pre_key().public_key(), false)
            .unwrap();
        let b = bob
            .shared_secret(&alice.public_bundle(), bob.pre_key().public_key(), false)
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn unsigned_peer_prekey_is_rejected() {
        let alice = PrivateKeyBundle::generate().unwrap();
        let bob = PrivateKeyBundle::generate().unwrap();

        let mut peer = bob.public_bundle();
        // Swap in a prekey the identity key never countersigned.
        peer.pre_key = PrivateKey::generate().public_key().clone();

        let err = alice
            .shared_secret(&peer, alice.pre_key().public_key(), false)
            .unwrap_err();
        assert!(matches!(err, CryptoError::PeerPreKeySignatureInvalid));
    }

    #[test]
    fn rotation_keeps_old_prekeys_usable() {
        let mut bundle = PrivateKeyBundle::generate().unwrap();
        let old = bundle.pre_key().public_key().clone();
        bundle.rotate_pre_key().unwrap();

        assert!(!bundle.pre_key().public_key().matches(&old));
        assert!(bundle.find_pre_key(&old).is_some());
        bundle.public_bundle().validate().unwrap();
    }

    #[test]
    fn wallet_binding_recovers_address() {
        let wallet = LocalWallet::generate();
        let mut bundle = PrivateKeyBundle::generate().unwrap();
        bundle.bind_to_wallet(&wallet).unwrap();

        let public = bundle.public_bundle();
        assert_eq!(public.wallet_address(), wallet.address());
        assert!(verify_wallet_binding(&public.identity_key, &wallet.address()).unwrap());

        let other = LocalWallet::generate();
        assert!(!verify_wallet_binding(&public.identity_key, &other.address()).unwrap());
    }

    #[test]
    fn unbound_identity_stands_for_itself() {
        let bundle = PrivateKeyBundle::generate().unwrap();
        let public = bundle.public_bundle();
        assert_eq!(
            public.wallet_address(),
            public.identity_key.ethereum_address()
        );
        assert!(matches!(
            public.recover_wallet_address(),
            Err(CryptoError::MissingSignature)
        ));
    }

    #[test]
    fn wallet_export_roundtrip() {
        let wallet = LocalWallet::generate();
        let bundle = PrivateKeyBundle::generate().unwrap();

        let sealed = bundle.encrypt_to_wallet(&wallet).unwrap();
        let restored = PrivateKeyBundle::decrypt_from_wallet(&sealed, &wallet).unwrap();

        assert!(restored.public_bundle().matches(&bundle.public_bundle()));
        // The trust chain survives the round trip.
        restored.public_bundle().validate().unwrap();

        let stranger = LocalWallet::generate();
        let err = PrivateKeyBundle::decrypt_from_wallet(&sealed, &stranger).unwrap_err();
        assert!(matches!(err, CryptoError::AeadIntegrity));
    }
}
