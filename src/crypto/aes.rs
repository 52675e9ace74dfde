use aes_gcm::{
    aead::{Aead, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use aes_gcm::aead::rand_core::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};
use crate::error::CodecError;

/// The size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// The size of the AES-GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;

/// A secure key wrapper that ensures the key is zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecureKey([u8; KEY_SIZE]);

impl SecureKey {
    /// Derives an AES-256 key from secret material of any length.
    pub fn derive(material: &[u8]) -> Self {
        let digest = Sha256::digest(material);
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&digest);
        Self(key)
    }

    /// Returns a reference to the key as a byte slice.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

/// Generates a new random AES-GCM nonce.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypts `plaintext` with AES-256-GCM, authenticating `aad` alongside it.
///
/// The output is `ciphertext || nonce`, with the 12-byte nonce at the end.
pub fn seal(key: &SecureKey, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CodecError> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let nonce_bytes = generate_nonce();
    let nonce = Nonce::from(nonce_bytes);

    let mut sealed = cipher
        .encrypt(&nonce, Payload { msg: plaintext, aad })
        .map_err(|e| CodecError::Encoding(format!("encryption failed: {}", e)))?;

    sealed.extend_from_slice(&nonce_bytes);
    Ok(sealed)
}

/// Decrypts a `ciphertext || nonce` buffer produced by [`seal`].
pub fn open(key: &SecureKey, aad: &[u8], sealed: &[u8]) -> Result<Vec<u8>, CodecError> {
    if sealed.len() < NONCE_SIZE {
        return Err(CodecError::Decoding("ciphertext too short".to_string()));
    }

    let (ciphertext, nonce_bytes) = sealed.split_at(sealed.len() - NONCE_SIZE);
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, Payload { msg: ciphertext, aad })
        .map_err(|e| CodecError::Decoding(format!("decryption failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_then_open() {
        let key = SecureKey::derive(b"block-key");
        let sealed = seal(&key, b"session-name", b"hello").unwrap();
        assert_eq!(sealed.len(), 5 + 16 + NONCE_SIZE);
        assert_eq!(open(&key, b"session-name", &sealed).unwrap(), b"hello");
    }

    #[test]
    fn open_rejects_other_name() {
        let key = SecureKey::derive(b"block-key");
        let sealed = seal(&key, b"a", b"hello").unwrap();
        assert!(matches!(open(&key, b"b", &sealed), Err(CodecError::Decoding(_))));
    }

    #[test]
    fn open_rejects_short_input() {
        let key = SecureKey::derive(b"block-key");
        assert!(open(&key, b"a", &[0u8; 4]).is_err());
    }
}
