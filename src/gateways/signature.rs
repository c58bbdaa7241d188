//! Gateway signature schemes.
//!
//! Midtrans signs notifications with a bare SHA-512 over the concatenation
//! `order_id + status_code + gross_amount + server_key`. DOKU signs a
//! newline-joined canonical string with HMAC-SHA256 and prefixes the Base64
//! output with `HMACSHA256=`; request bodies enter the canonical string as a
//! `Digest:` line holding Base64(SHA-256(body)).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};

pub const DOKU_SIGNATURE_PREFIX: &str = "HMACSHA256=";

/// Components of the DOKU canonical string, in signing order.
#[derive(Debug, Clone)]
pub struct DokuSignatureComponents<'a> {
    pub client_id: &'a str,
    pub request_id: &'a str,
    pub request_timestamp: &'a str,
    pub request_target: &'a str,
    pub body: Option<&'a [u8]>,
}

/// SHA-512 hex digest of `order_id + status_code + gross_amount + server_key`,
/// no separators.
pub fn midtrans_signature(
    order_id: &str,
    status_code: &str,
    gross_amount: &str,
    server_key: &str,
) -> String {
    let mut hasher = Sha512::new();
    hasher.update(order_id.as_bytes());
    hasher.update(status_code.as_bytes());
    hasher.update(gross_amount.as_bytes());
    hasher.update(server_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Midtrans verification is a case-sensitive exact comparison of the hex
/// digests, done in constant time.
pub fn verify_midtrans(
    received: &str,
    order_id: &str,
    status_code: &str,
    gross_amount: &str,
    server_key: &str,
) -> bool {
    let expected = midtrans_signature(order_id, status_code, gross_amount, server_key);
    secure_eq(expected.as_bytes(), received.as_bytes())
}

/// `Digest:` header value for a DOKU request body.
pub fn doku_digest(body: &[u8]) -> String {
    BASE64.encode(Sha256::digest(body))
}

fn doku_canonical_string(components: &DokuSignatureComponents<'_>) -> String {
    let mut lines = vec![
        format!("Client-Id:{}", components.client_id),
        format!("Request-Id:{}", components.request_id),
        format!("Request-Timestamp:{}", components.request_timestamp),
        format!("Request-Target:{}", components.request_target),
    ];
    if let Some(body) = components.body {
        lines.push(format!("Digest:{}", doku_digest(body)));
    }
    lines.join("\n")
}

pub fn doku_signature(components: &DokuSignatureComponents<'_>, secret_key: &str) -> String {
    type HmacSha256 = Hmac<Sha256>;
    // HMAC accepts keys of any length, so this cannot fail.
    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
    mac.update(doku_canonical_string(components).as_bytes());
    format!(
        "{}{}",
        DOKU_SIGNATURE_PREFIX,
        BASE64.encode(mac.finalize().into_bytes())
    )
}

pub fn verify_doku(
    received: &str,
    components: &DokuSignatureComponents<'_>,
    secret_key: &str,
) -> bool {
    let expected = doku_signature(components, secret_key);
    secure_eq(expected.as_bytes(), received.trim().as_bytes())
}

/// Constant-time byte comparison.
pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
