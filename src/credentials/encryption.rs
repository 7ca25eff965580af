//! AES-256-GCM encryption for credential tokens.
//!
//! Each token is encrypted separately with a unique nonce. The master key must be
//! 32 bytes (256 bits) and is provided base64-encoded from the environment.
//! Ciphertext format: base64(nonce || ciphertext || tag).

use crate::error::{Error, Result};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// Size of the encryption key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// Validates that the master key is exactly 32 bytes when base64 decoded.
pub fn validate_key(key_base64: &str) -> Result<Vec<u8>> {
    let key_bytes = BASE64
        .decode(key_base64.trim())
        .map_err(|e| Error::Config(format!("encryption key is not valid base64: {}", e)))?;

    if key_bytes.len() != KEY_SIZE {
        return Err(Error::Config(format!(
            "Encryption key must be {} bytes (256 bits), got {} bytes",
            KEY_SIZE,
            key_bytes.len()
        )));
    }

    Ok(key_bytes)
}

/// Symmetric cipher for tokens at rest.
///
/// Built once at startup and shared read-only (`Arc<Cipher>`) by the vault.
pub struct Cipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher").field("key", &"<redacted>").finish()
    }
}

impl Cipher {
    /// Creates a cipher from a base64-encoded 32-byte key.
    pub fn new(key_base64: &str) -> Result<Self> {
        let key_bytes = validate_key(key_base64)?;
        Self::from_bytes(&key_bytes)
    }

    pub fn from_bytes(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_SIZE {
            return Err(Error::Config(format!(
                "Encryption key must be {} bytes",
                KEY_SIZE
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| Error::Config(format!("Failed to create cipher: {}", e)))?;

        Ok(Self { cipher })
    }

    /// Encrypts plaintext with a fresh random nonce.
    ///
    /// The same plaintext never produces the same ciphertext twice.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        // Never reuse a nonce under the same key
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| Error::Encryption(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(&sealed))
    }

    /// Decrypts a value produced by [`Cipher::encrypt`].
    ///
    /// Fails with [`Error::Decryption`] on a wrong key, a tampered value or
    /// anything that is not our ciphertext format.
    pub fn decrypt(&self, sealed: &str) -> Result<String> {
        let bytes = BASE64
            .decode(sealed)
            .map_err(|e| Error::Decryption(format!("ciphertext is not valid base64: {}", e)))?;

        // GCM tag alone is 16 bytes, so anything this short is corrupt
        if bytes.len() <= NONCE_SIZE {
            return Err(Error::Decryption(format!(
                "ciphertext too short: {} bytes",
                bytes.len()
            )));
        }

        let (nonce, ciphertext) = bytes.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::Decryption("wrong key or corrupted data".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|_| Error::Decryption("decrypted data is not valid UTF-8".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher(byte: u8) -> Cipher {
        Cipher::from_bytes(&[byte; 32]).unwrap()
    }

    #[test]
    fn test_key_validation() {
        // Valid 32-byte key (base64-encoded)
        let valid_key = BASE64.encode([0u8; 32]);
        assert!(validate_key(&valid_key).is_ok());

        // Too short
        let short_key = BASE64.encode([0u8; 16]);
        assert!(matches!(validate_key(&short_key), Err(Error::Config(_))));

        // Too long
        let long_key = BASE64.encode([0u8; 64]);
        assert!(validate_key(&long_key).is_err());

        // Invalid base64
        assert!(validate_key("not-valid-base64!@#$").is_err());
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let cipher = test_cipher(0);

        for plaintext in ["my-secret-access-token-12345", "", "ünïcødé ✓", "T"] {
            let sealed = cipher.encrypt(plaintext).expect("Encryption failed");
            assert_ne!(sealed, plaintext);
            assert_eq!(cipher.decrypt(&sealed).expect("Decryption failed"), plaintext);
        }
    }

    #[test]
    fn test_different_nonces() {
        let cipher = test_cipher(0);

        let first = cipher.encrypt("same-plaintext").unwrap();
        let second = cipher.encrypt("same-plaintext").unwrap();

        assert_ne!(first, second);
        assert_eq!(cipher.decrypt(&first).unwrap(), "same-plaintext");
        assert_eq!(cipher.decrypt(&second).unwrap(), "same-plaintext");
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = test_cipher(0).encrypt("secret").unwrap();

        let result = test_cipher(1).decrypt(&sealed);
        assert!(matches!(result, Err(Error::Decryption(_))));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let cipher = test_cipher(0);
        let sealed = cipher.encrypt("secret").unwrap();

        let mut bytes = BASE64.decode(&sealed).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;

        let result = cipher.decrypt(&BASE64.encode(&bytes));
        assert!(matches!(result, Err(Error::Decryption(_))));
    }

    #[test]
    fn test_garbage_input_is_decryption_error() {
        let cipher = test_cipher(0);

        assert!(matches!(cipher.decrypt("%%%"), Err(Error::Decryption(_))));
        assert!(matches!(
            cipher.decrypt(&BASE64.encode([0u8; 5])),
            Err(Error::Decryption(_))
        ));
    }

    #[test]
    fn test_debug_redacts_key() {
        let debug = format!("{:?}", test_cipher(7));
        assert!(debug.contains("redacted"));
    }
}
