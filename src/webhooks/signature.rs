//! GitHub webhook signature verification.
//!
//! GitHub signs every delivery with HMAC over the raw body using the shared
//! webhook secret. The legacy `X-Hub-Signature` header carries `sha1=<hex>`,
//! the newer `X-Hub-Signature-256` header carries `sha256=<hex>`. When both are
//! sent, the SHA-256 signature is the one checked.
//!
//! Verification happens before any parsing; an invalid signature is rejected
//! without looking at the payload.

use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

/// Header carrying the HMAC-SHA1 signature.
pub const HEADER_SIGNATURE_SHA1: &str = "x-hub-signature";

/// Header carrying the HMAC-SHA256 signature.
pub const HEADER_SIGNATURE_SHA256: &str = "x-hub-signature-256";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    Sha1,
    Sha256,
}

impl SignatureAlgorithm {
    fn prefix(self) -> &'static str {
        match self {
            SignatureAlgorithm::Sha1 => "sha1=",
            SignatureAlgorithm::Sha256 => "sha256=",
        }
    }
}

/// Parses a signature header (`sha1=<hex>` or `sha256=<hex>`) into raw bytes.
///
/// Returns `None` when the prefix does not match `algorithm` or the hex is
/// malformed.
pub fn parse_signature_header(header: &str, algorithm: SignatureAlgorithm) -> Option<Vec<u8>> {
    let hex_sig = header.strip_prefix(algorithm.prefix())?;
    hex::decode(hex_sig).ok()
}

fn compute<M: Mac + KeyInit>(payload: &[u8], secret: &[u8]) -> Option<Vec<u8>> {
    let mut mac = <M as Mac>::new_from_slice(secret).ok()?;
    mac.update(payload);
    Some(mac.finalize().into_bytes().to_vec())
}

fn verify<M: Mac + KeyInit>(payload: &[u8], expected: &[u8], secret: &[u8]) -> bool {
    let Ok(mut mac) = <M as Mac>::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);
    // Constant-time comparison.
    mac.verify_slice(expected).is_ok()
}

/// Computes the signature of `payload`.
///
/// Returns `None` only if the MAC rejects the key, which HMAC never does.
pub fn compute_signature(
    payload: &[u8],
    secret: &[u8],
    algorithm: SignatureAlgorithm,
) -> Option<Vec<u8>> {
    match algorithm {
        SignatureAlgorithm::Sha1 => compute::<HmacSha1>(payload, secret),
        SignatureAlgorithm::Sha256 => compute::<HmacSha256>(payload, secret),
    }
}

/// Formats a signature as a GitHub header value.
pub fn format_signature_header(signature: &[u8], algorithm: SignatureAlgorithm) -> String {
    format!("{}{}", algorithm.prefix(), hex::encode(signature))
}

/// Verifies one signature header against the payload and secret.
pub fn verify_signature(
    payload: &[u8],
    signature_header: &str,
    secret: &[u8],
    algorithm: SignatureAlgorithm,
) -> bool {
    let Some(expected) = parse_signature_header(signature_header, algorithm) else {
        return false;
    };
    match algorithm {
        SignatureAlgorithm::Sha1 => verify::<HmacSha1>(payload, &expected, secret),
        SignatureAlgorithm::Sha256 => verify::<HmacSha256>(payload, &expected, secret),
    }
}

/// Verifies a delivery given its signature headers.
///
/// The SHA-256 header wins when present. A delivery with neither header is
/// rejected.
pub fn verify_delivery(
    payload: &[u8],
    sha1_header: Option<&str>,
    sha256_header: Option<&str>,
    secret: &[u8],
) -> bool {
    match (sha256_header, sha1_header) {
        (Some(header), _) => verify_signature(payload, header, secret, SignatureAlgorithm::Sha256),
        (None, Some(header)) => verify_signature(payload, header, secret, SignatureAlgorithm::Sha1),
        (None, None) => false,
    }
}
