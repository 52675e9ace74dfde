use std::env;
use std::net::SocketAddr;
use std::time::Duration;
use anyhow::{Context, Result};
use zeroize::{Zeroize, Zeroizing};

use crate::crypto::codec::{DEFAULT_MAX_LENGTH, KeyPair};
use crate::services::session::DEFAULT_SESSION_NAME;
use crate::services::sweeper::DEFAULT_SWEEP_INTERVAL;

/// Raw secret material for one cookie key pair.
#[derive(Clone)]
pub struct KeyMaterial {
    pub signing: Zeroizing<Vec<u8>>,
    pub encryption: Option<Zeroizing<Vec<u8>>>,
}

impl KeyMaterial {
    pub fn to_key_pair(&self) -> KeyPair {
        KeyPair::new(&self.signing, self.encryption.as_deref().map(Vec::as_slice))
    }
}

/// The application's configuration.
#[derive(Clone)]
pub struct Config {
    /// The URL of the PostgreSQL database. Sessions are kept in memory when unset.
    pub database_url: Option<String>,
    /// Cookie key pairs, newest first.
    pub session_keys: Vec<KeyMaterial>,
    /// Name of the session cookie.
    pub cookie_name: String,
    /// Default session lifetime in seconds.
    pub session_max_age_secs: i64,
    /// Maximum encoded length of a cookie or stored session blob.
    pub session_max_length: usize,
    /// How often expired sessions are deleted.
    pub sweep_interval: Duration,
    /// Whether session cookies carry the `Secure` attribute.
    pub cookie_secure: bool,
    /// The address the server listens on.
    pub bind_addr: SocketAddr,
    /// Optional single account for the demo login route.
    pub demo_username: Option<String>,
    pub demo_password: Option<Zeroizing<String>>,
}

impl Config {
    /// Creates a new `Config` from environment variables.
    pub fn from_env() -> Result<Self> {
        let mut keys_hex = env::var("SESSION_KEYS").context(
            "SESSION_KEYS must be set (comma-separated hex pairs, signing[:encryption], newest first)",
        )?;
        let session_keys = parse_session_keys(&keys_hex);
        keys_hex.zeroize();
        let session_keys = session_keys?;

        Ok(Self {
            database_url: env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
            session_keys,
            cookie_name: env::var("SESSION_COOKIE_NAME")
                .unwrap_or_else(|_| DEFAULT_SESSION_NAME.to_string()),
            session_max_age_secs: env::var("SESSION_MAX_AGE_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .context("Invalid SESSION_MAX_AGE_SECS")?,
            session_max_length: env::var("SESSION_MAX_LENGTH")
                .unwrap_or_else(|_| DEFAULT_MAX_LENGTH.to_string())
                .parse()
                .context("Invalid SESSION_MAX_LENGTH")?,
            sweep_interval: parse_sweep_interval(
                &env::var("SESSION_SWEEP_INTERVAL_SECS")
                    .unwrap_or_else(|_| DEFAULT_SWEEP_INTERVAL.as_secs().to_string()),
            )?,
            cookie_secure: env::var("SESSION_COOKIE_SECURE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            bind_addr: env::var("BIND_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
                .parse()
                .context("Invalid BIND_ADDR")?,
            demo_username: env::var("DEMO_USERNAME").ok(),
            demo_password: env::var("DEMO_PASSWORD").ok().map(Zeroizing::new),
        })
    }
}

/// Parses a sweep interval in seconds. Zero or negative means the default.
pub fn parse_sweep_interval(raw: &str) -> Result<Duration> {
    let secs: i64 = raw
        .trim()
        .parse()
        .context("Invalid SESSION_SWEEP_INTERVAL_SECS")?;
    Ok(u64::try_from(secs)
        .ok()
        .filter(|secs| *secs > 0)
        .map_or(DEFAULT_SWEEP_INTERVAL, Duration::from_secs))
}

/// Parses `signing[:encryption],signing[:encryption],...` where every part is hex.
pub fn parse_session_keys(raw: &str) -> Result<Vec<KeyMaterial>> {
    let mut keys = Vec::new();

    for (index, entry) in raw.split(',').map(str::trim).filter(|e| !e.is_empty()).enumerate() {
        let (signing_hex, encryption_hex) = match entry.split_once(':') {
            Some((signing, encryption)) => (signing, Some(encryption)),
            None => (entry, None),
        };

        let signing = hex::decode(signing_hex)
            .with_context(|| format!("SESSION_KEYS entry {} signing key must be hex", index))?;
        if signing.is_empty() {
            anyhow::bail!("SESSION_KEYS entry {} has an empty signing key", index);
        }

        let encryption = encryption_hex
            .map(|h| {
                hex::decode(h).with_context(|| {
                    format!("SESSION_KEYS entry {} encryption key must be hex", index)
                })
            })
            .transpose()?;

        keys.push(KeyMaterial {
            signing: Zeroizing::new(signing),
            encryption: encryption.map(Zeroizing::new),
        });
    }

    if keys.is_empty() {
        anyhow::bail!("SESSION_KEYS must contain at least one key pair");
    }

    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pairs_in_order() {
        let keys = parse_session_keys("0a0b:0c0d, 01").unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].signing.as_slice(), &[0x0a, 0x0b]);
        assert_eq!(keys[0].encryption.as_deref().map(Vec::as_slice), Some(&[0x0c, 0x0d][..]));
        assert_eq!(keys[1].signing.as_slice(), &[0x01]);
        assert!(keys[1].encryption.is_none());
        assert!(keys[0].to_key_pair().encrypts());
    }

    #[test]
    fn non_positive_sweep_interval_uses_default() {
        assert_eq!(parse_sweep_interval("60").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_sweep_interval("0").unwrap(), DEFAULT_SWEEP_INTERVAL);
        assert_eq!(parse_sweep_interval("-5").unwrap(), DEFAULT_SWEEP_INTERVAL);
        assert!(parse_sweep_interval("soon").is_err());
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_session_keys("").is_err());
        assert!(parse_session_keys("zz").is_err());
        assert!(parse_session_keys("0a:zz").is_err());
        assert!(parse_session_keys(":0a").is_err());
    }
}
