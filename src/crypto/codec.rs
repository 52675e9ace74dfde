//! Signed and optionally encrypted cookie values with ordered key rotation.
//!
//! Encoding always uses the first [`KeyPair`]. Decoding tries every pair in
//! order and uses the first one whose signature verifies, so prepending a new
//! pair rotates keys without invalidating cookies issued under the old ones.
//!
//! Wire format, innermost first:
//!
//! 1. `{"v":1,"ts":<unix secs>,"value":...}` serialized as JSON
//! 2. AES-256-GCM sealed with the cookie name as associated data, when the pair
//!    carries an encryption key
//! 3. base64url, then HMAC-SHA256 signed through the cookie crate's signed jar
//! 4. base64url again so the result is safe in a cookie or a `TEXT` column

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha512};
use tower_cookies::Key;
use tower_cookies::cookie::{Cookie, CookieJar};

use crate::crypto::aes::{self, SecureKey};
use crate::error::CodecError;

const VERSION: u8 = 1;

/// Default ceiling for an encoded value, matching common browser cookie limits.
pub const DEFAULT_MAX_LENGTH: usize = 4096;
/// Default validity window for an encoded value, in seconds.
pub const DEFAULT_MAX_AGE: i64 = 86400 * 30;

#[derive(Serialize)]
struct EnvelopeRef<'a, T: ?Sized> {
    v: u8,
    ts: i64,
    value: &'a T,
}

#[derive(Deserialize)]
struct Envelope<T> {
    v: u8,
    ts: i64,
    value: T,
}

/// Secret material for one generation of cookies.
#[derive(Clone)]
pub struct KeyPair {
    signing: Key,
    encryption: Option<SecureKey>,
}

impl KeyPair {
    /// Builds a pair from raw secrets of any length.
    ///
    /// The signing secret is stretched through SHA-512 to the 64 bytes the
    /// signed jar expects; the encryption secret through SHA-256 to an AES-256 key.
    pub fn new(signing: &[u8], encryption: Option<&[u8]>) -> Self {
        let digest = Sha512::digest(signing);
        Self {
            signing: Key::from(digest.as_slice()),
            encryption: encryption.map(SecureKey::derive),
        }
    }

    /// Whether values encoded with this pair are encrypted as well as signed.
    pub fn encrypts(&self) -> bool {
        self.encryption.is_some()
    }

    fn sign(&self, name: &str, payload: String) -> Option<String> {
        let mut jar = CookieJar::new();
        jar.signed_mut(&self.signing)
            .add(Cookie::new(name.to_string(), payload));
        jar.get(name).map(|cookie| cookie.value().to_string())
    }

    fn verify(&self, name: &str, signed: &str) -> Option<String> {
        let mut jar = CookieJar::new();
        jar.add_original(Cookie::new(name.to_string(), signed.to_string()));
        jar.signed(&self.signing)
            .get(name)
            .map(|cookie| cookie.value().to_string())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("signing", &"[redacted]")
            .field("encrypts", &self.encrypts())
            .finish()
    }
}

/// Encoder/decoder shared by the session cookie and the persisted session data.
pub struct CookieCodec {
    pairs: RwLock<Vec<KeyPair>>,
    max_age: AtomicI64,
    max_length: AtomicUsize,
}

impl fmt::Debug for CookieCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieCodec")
            .field("key_pairs", &self.key_pair_count())
            .field("max_age", &self.max_age())
            .field("max_length", &self.max_length())
            .finish()
    }
}

impl CookieCodec {
    /// Creates a codec from key pairs ordered newest first.
    pub fn new(pairs: Vec<KeyPair>) -> Result<Self, CodecError> {
        if pairs.is_empty() {
            return Err(CodecError::Encoding("no key pairs configured".to_string()));
        }

        Ok(Self {
            pairs: RwLock::new(pairs),
            max_age: AtomicI64::new(DEFAULT_MAX_AGE),
            max_length: AtomicUsize::new(DEFAULT_MAX_LENGTH),
        })
    }

    /// Sets the validity window in seconds for every key pair. Zero disables the check.
    pub fn set_max_age(&self, seconds: i64) {
        self.max_age.store(seconds, Ordering::SeqCst);
    }

    /// Sets the maximum encoded length in bytes for every key pair. Zero disables the check.
    pub fn set_max_length(&self, bytes: usize) {
        self.max_length.store(bytes, Ordering::SeqCst);
    }

    pub fn max_age(&self) -> i64 {
        self.max_age.load(Ordering::SeqCst)
    }

    pub fn max_length(&self) -> usize {
        self.max_length.load(Ordering::SeqCst)
    }

    pub fn key_pair_count(&self) -> usize {
        self.pairs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Makes `pair` the encoding key while keeping older pairs for decoding.
    pub fn rotate(&self, pair: KeyPair) {
        let mut pairs = self.pairs.write().unwrap_or_else(PoisonError::into_inner);
        pairs.insert(0, pair);
        tracing::info!(key_pairs = pairs.len(), "Cookie key pair rotated in");
    }

    /// Drops the oldest key pair. The last remaining pair is never removed.
    pub fn retire_oldest(&self) -> bool {
        let mut pairs = self.pairs.write().unwrap_or_else(PoisonError::into_inner);
        if pairs.len() <= 1 {
            return false;
        }
        pairs.pop();
        tracing::info!(key_pairs = pairs.len(), "Oldest cookie key pair retired");
        true
    }

    /// Encodes `value` under `name` with the newest key pair.
    pub fn encode<T>(&self, name: &str, value: &T) -> Result<String, CodecError>
    where
        T: Serialize + ?Sized,
    {
        self.encode_at(name, value, Utc::now().timestamp())
    }

    fn encode_at<T>(&self, name: &str, value: &T, ts: i64) -> Result<String, CodecError>
    where
        T: Serialize + ?Sized,
    {
        let json = sonic_rs::to_vec(&EnvelopeRef {
            v: VERSION,
            ts,
            value,
        })
        .map_err(|e| CodecError::Encoding(e.to_string()))?;

        let signed = {
            let pairs = self.pairs.read().unwrap_or_else(PoisonError::into_inner);
            let pair = pairs
                .first()
                .ok_or_else(|| CodecError::Encoding("no key pairs configured".to_string()))?;

            let payload = match &pair.encryption {
                Some(key) => URL_SAFE_NO_PAD.encode(aes::seal(key, name.as_bytes(), &json)?),
                None => URL_SAFE_NO_PAD.encode(&json),
            };

            pair.sign(name, payload)
                .ok_or_else(|| CodecError::Encoding("signing produced no value".to_string()))?
        };

        let encoded = URL_SAFE_NO_PAD.encode(signed);
        self.check_length(encoded.len())?;
        Ok(encoded)
    }

    /// Decodes a value produced by [`CookieCodec::encode`] under the same `name`.
    pub fn decode<T>(&self, name: &str, encoded: &str) -> Result<T, CodecError>
    where
        T: DeserializeOwned,
    {
        self.check_length(encoded.len())?;

        let signed = URL_SAFE_NO_PAD
            .decode(encoded.as_bytes())
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .ok_or(CodecError::InvalidSignature)?;

        let pairs = self.pairs.read().unwrap_or_else(PoisonError::into_inner);
        for (index, pair) in pairs.iter().enumerate() {
            let Some(payload) = pair.verify(name, &signed) else {
                continue;
            };

            if index > 0 {
                tracing::debug!(key_index = index, "Cookie verified with a rotated-out key pair");
            }

            let raw = URL_SAFE_NO_PAD
                .decode(payload.as_bytes())
                .map_err(|e| CodecError::Decoding(e.to_string()))?;

            let json = match &pair.encryption {
                Some(key) => aes::open(key, name.as_bytes(), &raw)?,
                None => raw,
            };

            let envelope: Envelope<T> = sonic_rs::from_slice(&json)
                .map_err(|e| CodecError::Decoding(e.to_string()))?;

            if envelope.v != VERSION {
                return Err(CodecError::Decoding(format!(
                    "unsupported envelope version: {}",
                    envelope.v
                )));
            }

            let max_age = self.max_age();
            if max_age > 0 && envelope.ts.saturating_add(max_age) < Utc::now().timestamp() {
                return Err(CodecError::Expired);
            }

            return Ok(envelope.value);
        }

        Err(CodecError::InvalidSignature)
    }

    fn check_length(&self, len: usize) -> Result<(), CodecError> {
        let max = self.max_length();
        if max > 0 && len > max {
            return Err(CodecError::MaxLengthExceeded { len, max });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn pair_a() -> KeyPair {
        KeyPair::new(b"signing-key-a", None)
    }

    fn pair_b() -> KeyPair {
        KeyPair::new(b"signing-key-b", Some(b"encryption-key-b"))
    }

    #[test]
    fn round_trip_values() {
        let codec = CookieCodec::new(vec![pair_b()]).unwrap();
        let mut values = HashMap::new();
        values.insert("userID".to_string(), sonic_rs::json!("u-123"));
        values.insert("cart".to_string(), sonic_rs::json!(["a", "b"]));

        let encoded = codec.encode("session-name", &values).unwrap();
        let decoded: HashMap<String, sonic_rs::Value> =
            codec.decode("session-name", &encoded).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn output_is_cookie_safe() {
        let codec = CookieCodec::new(vec![pair_b()]).unwrap();
        let encoded = codec.encode("session-name", "ABCDEF").unwrap();
        assert!(
            encoded
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn encrypted_payload_hides_plaintext() {
        let codec = CookieCodec::new(vec![pair_b()]).unwrap();
        let encoded = codec.encode("n", "very-secret-value").unwrap();
        let signed = String::from_utf8(URL_SAFE_NO_PAD.decode(&encoded).unwrap()).unwrap();
        assert!(!signed.contains("very-secret-value"));
        assert!(!signed.contains(&URL_SAFE_NO_PAD.encode("very-secret-value")[..12]));
    }

    #[test]
    fn rotation_keeps_old_cookies_readable() {
        let old = CookieCodec::new(vec![pair_a()]).unwrap();
        let encoded = old.encode("session-name", "ID-1").unwrap();

        let rotated = CookieCodec::new(vec![pair_b(), pair_a()]).unwrap();
        let id: String = rotated.decode("session-name", &encoded).unwrap();
        assert_eq!(id, "ID-1");

        let retired = CookieCodec::new(vec![pair_b()]).unwrap();
        assert_eq!(
            retired.decode::<String>("session-name", &encoded),
            Err(CodecError::InvalidSignature)
        );
    }

    #[test]
    fn rotate_and_retire_in_place() {
        let codec = CookieCodec::new(vec![pair_a()]).unwrap();
        let before = codec.encode("n", "x").unwrap();

        codec.rotate(pair_b());
        assert_eq!(codec.key_pair_count(), 2);
        assert_eq!(codec.decode::<String>("n", &before).unwrap(), "x");

        let after = codec.encode("n", "y").unwrap();
        assert!(codec.retire_oldest());
        assert!(!codec.retire_oldest());
        assert_eq!(codec.decode::<String>("n", &before), Err(CodecError::InvalidSignature));
        assert_eq!(codec.decode::<String>("n", &after).unwrap(), "y");
    }

    #[test]
    fn name_is_authenticated() {
        let codec = CookieCodec::new(vec![pair_b()]).unwrap();
        let encoded = codec.encode("one", "x").unwrap();
        assert!(codec.decode::<String>("two", &encoded).is_err());
    }

    #[test]
    fn tampering_is_detected() {
        let codec = CookieCodec::new(vec![pair_a()]).unwrap();
        let encoded = codec.encode("n", "x").unwrap();
        let mut signed = String::from_utf8(URL_SAFE_NO_PAD.decode(&encoded).unwrap()).unwrap();
        signed.push('A');
        let tampered = URL_SAFE_NO_PAD.encode(signed);
        assert_eq!(codec.decode::<String>("n", &tampered), Err(CodecError::InvalidSignature));
        assert_eq!(codec.decode::<String>("n", "%%%"), Err(CodecError::InvalidSignature));
    }

    #[test]
    fn expired_values_are_rejected() {
        let codec = CookieCodec::new(vec![pair_a()]).unwrap();
        codec.set_max_age(60);
        let stale = codec
            .encode_at("n", "x", Utc::now().timestamp() - 120)
            .unwrap();
        assert_eq!(codec.decode::<String>("n", &stale), Err(CodecError::Expired));

        codec.set_max_age(0);
        assert_eq!(codec.decode::<String>("n", &stale).unwrap(), "x");
    }

    #[test]
    fn max_length_is_enforced_both_ways() {
        let codec = CookieCodec::new(vec![pair_a()]).unwrap();
        let long = "x".repeat(512);
        let encoded = codec.encode("n", &long).unwrap();

        codec.set_max_length(64);
        assert!(matches!(
            codec.encode("n", &long),
            Err(CodecError::MaxLengthExceeded { max: 64, .. })
        ));
        assert!(matches!(
            codec.decode::<String>("n", &encoded),
            Err(CodecError::MaxLengthExceeded { .. })
        ));
    }

    #[test]
    fn empty_key_list_is_rejected() {
        assert!(CookieCodec::new(Vec::new()).is_err());
    }
}
