//! HMAC-SHA256 request signatures (`v0=<hex>` over `v0:{timestamp}:{body}`).

use crate::error::{Error, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const VERSION: &str = "v0";

fn mac(secret: &[u8], timestamp: i64, body: &[u8]) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| Error::Config(format!("invalid webhook secret: {}", e)))?;
    mac.update(format!("{}:{}:", VERSION, timestamp).as_bytes());
    mac.update(body);
    Ok(mac)
}

/// Signature header value for `body` sent at `timestamp`.
pub fn compute_signature(secret: &[u8], timestamp: i64, body: &[u8]) -> Result<String> {
    let digest = mac(secret, timestamp, body)?.finalize().into_bytes();
    Ok(format!("{}={}", VERSION, hex::encode(digest)))
}

/// Checks `signature` against the expected value in constant time.
pub fn verify_signature(secret: &[u8], timestamp: i64, body: &[u8], signature: &str) -> Result<()> {
    let encoded = signature
        .strip_prefix("v0=")
        .ok_or_else(|| Error::InvalidSignature("unsupported signature version".to_string()))?;

    let provided = hex::decode(encoded)
        .map_err(|_| Error::InvalidSignature("signature is not hex".to_string()))?;

    mac(secret, timestamp, body)?
        .verify_slice(&provided)
        .map_err(|_| Error::InvalidSignature("signature mismatch".to_string()))
}
