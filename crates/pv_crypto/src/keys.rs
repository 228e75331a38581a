//! secp256k1 identity primitives.
//!
//! Every protocol identity is a secp256k1 key pair. Signatures are compact
//! ECDSA with a recovery bit, so a verifier can recover the signer's public
//! key from a digest without knowing it in advance. That recovery path is
//! what lets a blockchain wallet countersign an identity key: the wallet's
//! key is never shipped, only its address is compared against the recovered
//! one.
//!
//! Key agreement uses raw scalar multiplication: each DH output is the full
//! 65-byte uncompressed shared point, not a hashed x-coordinate. Deployed
//! peers depend on this exact form, so it must not be "improved" to a
//! compressed or hashed variant.

use k256::{
    ecdsa::{
        signature::hazmat::PrehashVerifier, RecoveryId, Signature as EcdsaSignature, SigningKey,
        VerifyingKey,
    },
    elliptic_curve::sec1::ToEncodedPoint,
    ProjectivePoint, PublicKey as Secp256k1Point, SecretKey,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest as _, Keccak256};

use crate::{encoding, error::CryptoError, kdf::sha256};

/// Uncompressed SEC1 public key: 0x04 prefix plus two 32-byte coordinates.
pub const PUBLIC_KEY_SIZE: usize = 65;
/// Raw private scalar.
pub const PRIVATE_KEY_SIZE: usize = 32;
/// Compact ECDSA signature: R || S.
pub const SIGNATURE_SIZE: usize = 64;
/// First byte of every uncompressed SEC1 encoding.
pub const UNCOMPRESSED_PREFIX: u8 = 0x04;

// ── Signature ────────────────────────────────────────────────────────────────

/// Compact ECDSA signature with its recovery bit.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    #[serde(with = "encoding::hex_array")]
    bytes: [u8; SIGNATURE_SIZE],
    recovery_id: u8,
}

impl Signature {
    pub fn new(bytes: &[u8], recovery_id: u8) -> Result<Self, CryptoError> {
        let bytes: [u8; SIGNATURE_SIZE] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidSignatureLength(bytes.len()))?;
        if recovery_id > 1 {
            return Err(CryptoError::InvalidRecoveryBit(recovery_id));
        }
        Ok(Self { bytes, recovery_id })
    }

    pub fn bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.bytes
    }

    pub fn recovery_id(&self) -> u8 {
        self.recovery_id
    }

    /// Recover the signer's public key from the digest this signature was
    /// made over. Returns `None` on any recovery failure: the routine is
    /// used to *test* authorship, so an unrecoverable signature is an
    /// ordinary negative answer, not an error.
    pub fn recover_public_key(&self, digest: &[u8]) -> Option<PublicKey> {
        let sig = EcdsaSignature::from_slice(&self.bytes).ok()?;
        let recovery = RecoveryId::from_byte(self.recovery_id)?;
        let verifying = VerifyingKey::recover_from_prehash(digest, &sig, recovery).ok()?;
        PublicKey::from_bytes(verifying.to_encoded_point(false).as_bytes()).ok()
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signature")
            .field("bytes", &hex::encode(self.bytes))
            .field("recovery_id", &self.recovery_id)
            .finish()
    }
}

// ── Public key ───────────────────────────────────────────────────────────────

/// 65-byte uncompressed secp256k1 public key, optionally countersigned.
///
/// The countersignature attests that some other identity vouched for this
/// key: an identity key countersigns its prekeys, and a wallet countersigns
/// the identity key itself.
#[derive(Clone, Serialize, Deserialize)]
pub struct PublicKey {
    #[serde(with = "encoding::hex_array")]
    bytes: [u8; PUBLIC_KEY_SIZE],
    #[serde(skip_serializing_if = "Option::is_none", default)]
    signature: Option<Signature>,
}

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; PUBLIC_KEY_SIZE] =
            bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
                expected: PUBLIC_KEY_SIZE,
                actual: bytes.len(),
            })?;
        if bytes[0] != UNCOMPRESSED_PREFIX {
            return Err(CryptoError::InvalidKeyPrefix(bytes[0]));
        }
        Secp256k1Point::from_sec1_bytes(&bytes)
            .map_err(|_| CryptoError::InvalidInput("point is not on the secp256k1 curve".into()))?;
        Ok(Self { bytes, signature: None })
    }

    pub fn bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.bytes
    }

    pub fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }

    pub fn with_signature(mut self, signature: Signature) -> Self {
        self.signature = Some(signature);
        self
    }

    /// Plain ECDSA verification of `signature` over `digest` under this key.
    pub fn verify(&self, signature: &Signature, digest: &[u8]) -> bool {
        let Ok(sig) = EcdsaSignature::from_slice(signature.bytes()) else {
            return false;
        };
        let Ok(verifying) = VerifyingKey::from_sec1_bytes(&self.bytes) else {
            return false;
        };
        verifying.verify_prehash(digest, &sig).is_ok()
    }

    /// True when `signed` carries a countersignature made by *this* key over
    /// sha256 of the signed key's bytes. An absent countersignature is an
    /// ordinary `false`, never an error.
    pub fn verify_key(&self, signed: &PublicKey) -> bool {
        match signed.signature() {
            Some(sig) => self.verify(sig, &sha256(signed.bytes())),
            None => false,
        }
    }

    /// Ethereum-style account address: keccak256 of the 64-byte point body,
    /// last 20 bytes, `0x`-prefixed lowercase hex.
    pub fn ethereum_address(&self) -> String {
        let digest = Keccak256::digest(&self.bytes[1..]);
        format!("0x{}", hex::encode(&digest[digest.len() - 20..]))
    }

    /// Byte-wise key equality, ignoring any countersignature.
    ///
    /// Not constant-time: public key material is public, so equality timing
    /// leaks nothing an observer does not already have.
    pub fn matches(&self, other: &PublicKey) -> bool {
        self.bytes == other.bytes
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicKey")
            .field("bytes", &hex::encode(self.bytes))
            .field("signed", &self.signature.is_some())
            .finish()
    }
}

// ── Private key ──────────────────────────────────────────────────────────────

/// A secp256k1 private scalar with its derived public key.
///
/// The scalar lives inside [`SecretKey`], which zeroizes itself on drop.
/// Private keys never leave this type except through [`PrivateKey::to_bytes`],
/// which only the wallet-encrypted export path calls.
pub struct PrivateKey {
    secret: SecretKey,
    public: PublicKey,
}

impl PrivateKey {
    pub fn generate() -> Self {
        let secret = SecretKey::random(&mut OsRng);
        let public = Self::derive_public(&secret);
        Self { secret, public }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != PRIVATE_KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: PRIVATE_KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let secret = SecretKey::from_slice(bytes)
            .map_err(|_| CryptoError::InvalidInput("scalar out of range for secp256k1".into()))?;
        let public = Self::derive_public(&secret);
        Ok(Self { secret, public })
    }

    fn derive_public(secret: &SecretKey) -> PublicKey {
        let point = secret.public_key().to_encoded_point(false);
        // A derived public point always encodes to exactly 65 bytes.
        let mut bytes = [0u8; PUBLIC_KEY_SIZE];
        bytes.copy_from_slice(point.as_bytes());
        PublicKey { bytes, signature: None }
    }

    pub fn to_bytes(&self) -> [u8; PRIVATE_KEY_SIZE] {
        self.secret.to_bytes().into()
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub(crate) fn set_public_signature(&mut self, signature: Signature) {
        self.public.signature = Some(signature);
    }

    /// ECDSA over a caller-supplied 32-byte digest. This layer does not hash
    /// arbitrary messages; hashing is the caller's responsibility.
    pub fn sign(&self, digest: &[u8]) -> Result<Signature, CryptoError> {
        if digest.len() != 32 {
            return Err(CryptoError::InvalidInput(format!(
                "signing digest must be 32 bytes, got {}",
                digest.len()
            )));
        }
        let signing = SigningKey::from(&self.secret);
        let (sig, recovery) = signing
            .sign_prehash_recoverable(digest)
            .map_err(|e| CryptoError::Ecdsa(e.to_string()))?;
        Signature::new(&sig.to_bytes(), recovery.to_byte())
    }

    /// Countersign another public key: sha256 its bytes, sign the digest and
    /// return a copy carrying the signature. This one primitive builds the
    /// whole trust chain (identity over prekey, wallet over identity).
    pub fn sign_key(&self, key: &PublicKey) -> Result<PublicKey, CryptoError> {
        let signature = self.sign(&sha256(key.bytes()))?;
        Ok(key.clone().with_signature(signature))
    }

    /// Raw ECDH: scalar-multiply the peer point and return the shared point
    /// uncompressed. No hashing here; the key agreement concatenates these
    /// verbatim.
    pub fn shared_secret_point(
        &self,
        peer: &PublicKey,
    ) -> Result<[u8; PUBLIC_KEY_SIZE], CryptoError> {
        let point = Secp256k1Point::from_sec1_bytes(peer.bytes())
            .map_err(|_| CryptoError::InvalidInput("peer point is not on the curve".into()))?;
        let shared =
            (ProjectivePoint::from(*point.as_affine()) * *self.secret.to_nonzero_scalar())
                .to_affine();
        let encoded = shared.to_encoded_point(false);
        encoded
            .as_bytes()
            .try_into()
            .map_err(|_| CryptoError::Ecdsa("shared point is not a full uncompressed point".into()))
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

// Serialized as the hex scalar plus the public key's countersignature, so a
// restored key keeps its place in the trust chain. Only the wallet-encrypted
// export and the encrypted persistence layer ever serialize a private key.
#[derive(Serialize, Deserialize)]
struct PrivateKeyRepr {
    secret: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    signature: Option<Signature>,
}

impl Serialize for PrivateKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        PrivateKeyRepr {
            secret: hex::encode(self.to_bytes()),
            signature: self.public.signature.clone(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PrivateKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = PrivateKeyRepr::deserialize(deserializer)?;
        let bytes = hex::decode(&repr.secret).map_err(serde::de::Error::custom)?;
        let mut key = PrivateKey::from_bytes(&bytes).map_err(serde::de::Error::custom)?;
        key.public.signature = repr.signature;
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovery_roundtrip() {
        let key = PrivateKey::generate();
        let digest = sha256(b"recovery roundtrip");
        let sig = key.sign(&digest).unwrap();
        let recovered = sig.recover_public_key(&digest).expect("recoverable");
        assert_eq!(recovered.bytes(), key.public_key().bytes());
    }

    #[test]
    fn sign_verify() {
        let key = PrivateKey::generate();
        let digest = sha256(b"payload");
        let sig = key.sign(&digest).unwrap();
        assert!(key.public_key().verify(&sig, &digest));
        assert!(!key.public_key().verify(&sig, &sha256(b"other payload")));

        let stranger = PrivateKey::generate();
        assert!(!stranger.public_key().verify(&sig, &digest));
    }

    #[test]
    fn countersigned_key_validates() {
        let identity = PrivateKey::generate();
        let pre = PrivateKey::generate();
        let signed = identity.sign_key(pre.public_key()).unwrap();
        assert!(identity.public_key().verify_key(&signed));

        // Unsigned keys answer false, they do not error.
        assert!(!identity.public_key().verify_key(pre.public_key()));

        // The countersignature is bound to the exact key bytes: moving it to
        // any other key flips the answer.
        let other = PrivateKey::generate()
            .public_key()
            .clone()
            .with_signature(signed.signature().unwrap().clone());
        assert!(!identity.public_key().verify_key(&other));
    }

    #[test]
    fn known_ethereum_address() {
        let bytes = hex::decode(
            "04836b35a026743e823a90a0ee3b91bf615c6a757e2b60b9e1dc1826fd0dd16106\
             f7bc1e8179f665015f43c6c81f39062fc2086ed849625c06e04697698b21855e",
        )
        .unwrap();
        let key = PublicKey::from_bytes(&bytes).unwrap();
        assert_eq!(
            key.ethereum_address(),
            "0x0bed7abd61247635c1973eb38474a2516ed1d884"
        );
    }

    #[test]
    fn construction_rejects_bad_material() {
        assert!(matches!(
            PublicKey::from_bytes(&[0x04; 12]),
            Err(CryptoError::InvalidKeyLength { expected: 65, actual: 12 })
        ));

        let mut bytes = [0u8; PUBLIC_KEY_SIZE];
        bytes[0] = 0x02;
        assert!(matches!(
            PublicKey::from_bytes(&bytes),
            Err(CryptoError::InvalidKeyPrefix(0x02))
        ));

        assert!(matches!(
            Signature::new(&[0u8; 12], 0),
            Err(CryptoError::InvalidSignatureLength(12))
        ));
        assert!(matches!(
            Signature::new(&[0u8; SIGNATURE_SIZE], 2),
            Err(CryptoError::InvalidRecoveryBit(2))
        ));

        assert!(matches!(
            PrivateKey::from_bytes(&[1u8; 7]),
            Err(CryptoError::InvalidKeyLength { expected: 32, actual: 7 })
        ));
    }

    #[test]
    fn ecdh_is_commutative() {
        let a = PrivateKey::generate();
        let b = PrivateKey::generate();
        let ab = a.shared_secret_point(b.public_key()).unwrap();
        let ba = b.shared_secret_point(a.public_key()).unwrap();
        assert_eq!(ab, ba);
        assert_eq!(ab[0], UNCOMPRESSED_PREFIX);
    }
}
