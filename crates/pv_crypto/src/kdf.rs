//! Key derivation.
//!
//! `hkdf_expand` — HKDF-SHA256, the single expansion primitive behind every
//!   derived key in the protocol.
//! `invite_key_material` / `invite_topic_digest` — the deterministic
//!   per-conversation derivations both parties compute independently from the
//!   same shared secret.
//! `epoch_hmac_key` — 30-day rotating HMAC keys handed to untrusted push
//!   relays.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::{Digest as _, Sha256};

use crate::error::CryptoError;

/// Fixed salt for conversation key material. Part of the wire protocol:
/// both sides bake it in, it is never transmitted.
pub const INVITE_SALT: [u8; 32] = *b"__XMTP__INVITATION__SALT__XMTP__";

/// Seconds in one HMAC rotation epoch (30 days).
pub const EPOCH_SECS: i64 = 60 * 60 * 24 * 30;

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Expand `ikm` + `info` into `output.len()` bytes of key material.
///
/// `salt` may be `None` (HKDF substitutes a zeroed salt).
pub fn hkdf_expand(
    ikm: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    output: &mut [u8],
) -> Result<(), CryptoError> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    hk.expand(info, output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}

/// HMAC-SHA256 under a 32-byte key.
pub fn hmac_sha256(key: &[u8; 32], data: &[u8]) -> Result<[u8; 32], CryptoError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// Symmetric key material for a conversation, derived from the shared secret.
///
/// The info string starts with sequence number `"0"`; the sequence slot is
/// reserved so a future protocol revision can rotate key material without a
/// new salt.
pub fn invite_key_material(
    secret: &[u8],
    sorted_addresses: &[String],
) -> Result<[u8; 32], CryptoError> {
    let info = format!("0{}", sorted_addresses.join(","));
    let mut out = [0u8; 32];
    hkdf_expand(secret, Some(&INVITE_SALT), info.as_bytes(), &mut out)?;
    Ok(out)
}

/// Deterministic topic digest: HMAC-SHA256 keyed by the shared secret over
/// conversation id plus the sorted wallet addresses. Both parties compute
/// the same digest regardless of who invites whom.
pub fn invite_topic_digest(
    secret: &[u8],
    conversation_id: &str,
    sorted_addresses: &[String],
) -> Result<[u8; 32], CryptoError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    mac.update(conversation_id.as_bytes());
    mac.update(sorted_addresses.join(",").as_bytes());
    Ok(mac.finalize().into_bytes().into())
}

/// Rotating push-signal HMAC key for one 30-day epoch and one account.
///
/// A relay holding these keys can check who a payload claims to come from
/// without ever holding the conversation key material.
pub fn epoch_hmac_key(
    key_material: &[u8],
    epoch: i64,
    account_address: &str,
) -> Result<[u8; 32], CryptoError> {
    let info = format!("{epoch}-{account_address}");
    let mut out = [0u8; 32];
    hkdf_expand(key_material, None, info.as_bytes(), &mut out)?;
    Ok(out)
}

/// 30-day bucket index for a unix timestamp in seconds.
pub fn thirty_day_epoch(unix_secs: i64) -> i64 {
    unix_secs / EPOCH_SECS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs() -> Vec<String> {
        vec!["0xaaaa".to_string(), "0xbbbb".to_string()]
    }

    #[test]
    fn invite_derivations_are_deterministic() {
        let secret = [7u8; 195];
        let km1 = invite_key_material(&secret, &addrs()).unwrap();
        let km2 = invite_key_material(&secret, &addrs()).unwrap();
        assert_eq!(km1, km2);

        let t1 = invite_topic_digest(&secret, "conv", &addrs()).unwrap();
        let t2 = invite_topic_digest(&secret, "conv", &addrs()).unwrap();
        assert_eq!(t1, t2);

        // A different conversation id lands on a different topic.
        let t3 = invite_topic_digest(&secret, "other", &addrs()).unwrap();
        assert_ne!(t1, t3);
    }

    #[test]
    fn epoch_keys_rotate() {
        let km = [3u8; 32];
        let e5 = epoch_hmac_key(&km, 5, "0xaaaa").unwrap();
        let e6 = epoch_hmac_key(&km, 6, "0xaaaa").unwrap();
        assert_ne!(e5, e6);

        // Same epoch, different account: different key.
        let other = epoch_hmac_key(&km, 5, "0xbbbb").unwrap();
        assert_ne!(e5, other);
    }

    #[test]
    fn epoch_bucketing() {
        assert_eq!(thirty_day_epoch(0), 0);
        assert_eq!(thirty_day_epoch(EPOCH_SECS - 1), 0);
        assert_eq!(thirty_day_epoch(EPOCH_SECS), 1);
    }
}
