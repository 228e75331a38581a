//! Topic string formats.
//!
//! Topics are the pub-sub stream names the transport layer subscribes to.
//! The formats are part of the deployed wire protocol and must not change.

/// V2 conversation topic from the deterministic HMAC digest.
pub fn v2_message_topic(digest: &[u8]) -> String {
    format!("/xmtp/0/m-{}/proto", hex::encode(digest))
}

/// Legacy V1 direct-message topic from the two wallet addresses.
pub fn v1_direct_message_topic(address_a: &str, address_b: &str) -> String {
    let (lo, hi) = if address_a <= address_b {
        (address_a, address_b)
    } else {
        (address_b, address_a)
    };
    format!("/xmtp/0/dm-{lo}-{hi}/proto")
}

/// The two wallet addresses in canonical (sorted) order, shared by every
/// derivation that must come out identical from both directions.
pub fn sorted_addresses(address_a: &str, address_b: &str) -> Vec<String> {
    let mut addresses = vec![address_a.to_string(), address_b.to_string()];
    addresses.sort();
    addresses
}
