//! pv_crypto — Palaver Protocol cryptographic primitives
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Secret material is zeroized on drop and never leaves opaque types
//!   outside the explicit wallet-encrypted export path.
//! - Everything here is a pure function of its inputs: no global state, no
//!   background tasks, safe to call from any number of workers.
//!
//! # Module layout
//! - `keys`     — secp256k1 private/public keys, recoverable ECDSA,
//!                Ethereum-style addresses
//! - `bundle`   — identity+prekey bundles, trust chain, triple-DH agreement,
//!                wallet binding and wallet-encrypted export
//! - `aead`     — HKDF-SHA256 + AES-256-GCM envelope cipher
//! - `kdf`      — HKDF/HMAC derivations for topics, key material and
//!                rotating push-signal keys
//! - `encoding` — serde byte-field helpers
//! - `error`    — unified error type

pub mod aead;
pub mod bundle;
pub mod encoding;
pub mod error;
pub mod kdf;
pub mod keys;

pub use aead::Ciphertext;
pub use bundle::{
    EncryptedPrivateKeyBundle, KeyBundle, LocalWallet, PrivateKeyBundle, WalletSigner,
};
pub use error::CryptoError;
pub use keys::{PrivateKey, PublicKey, Signature};
