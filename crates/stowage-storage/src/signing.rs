//! Signed URLs
//!
//! `signature = hex(HMAC-SHA256(secret, "{remote_path}:{expires}"))`, appended to
//! the adapter's URL as `expires=<unix ts>&signature=<hex>`. The same secret is
//! used for every backend.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use std::time::Duration;

use crate::error::{StorageError, StorageResult};

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct UrlSigner {
    mac: HmacSha256,
}

impl fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrlSigner").finish_non_exhaustive()
    }
}

impl UrlSigner {
    pub fn new(secret: &str) -> StorageResult<Self> {
        if secret.trim().is_empty() {
            return Err(StorageError::Backend(
                "URL signing secret must not be empty".to_string(),
            ));
        }
        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| StorageError::Backend(format!("Invalid signing secret: {}", e)))?;
        Ok(Self { mac })
    }

    pub fn signature(&self, remote_path: &str, expires: i64) -> String {
        let mut mac = self.mac.clone();
        mac.update(format!("{}:{}", remote_path, expires).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Append `expires` and `signature` to `url`. Pure: same inputs, same output.
    pub fn sign_url(&self, url: &str, remote_path: &str, expires: i64) -> String {
        let separator = if url.contains('?') { '&' } else { '?' };
        format!(
            "{}{}expires={}&signature={}",
            url,
            separator,
            expires,
            self.signature(remote_path, expires)
        )
    }

    /// Sign `url` so that it expires `expires_in` from now.
    pub fn sign_url_for(&self, url: &str, remote_path: &str, expires_in: Duration) -> String {
        let expires = Utc::now().timestamp() + expires_in.as_secs() as i64;
        self.sign_url(url, remote_path, expires)
    }

    /// Check a signature presented by a client, in constant time.
    pub fn verify(&self, remote_path: &str, expires: i64, signature: &str, now: i64) -> bool {
        if now > expires {
            return false;
        }
        let Ok(tag) = hex::decode(signature) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(format!("{}:{}", remote_path, expires).as_bytes());
        mac.verify_slice(&tag).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> UrlSigner {
        UrlSigner::new("test-secret").unwrap()
    }

    #[test]
    fn same_inputs_produce_same_url() {
        let a = signer().sign_url("/videos/1/a.mp4", "videos/1/a.mp4", 1_700_000_000);
        let b = signer().sign_url("/videos/1/a.mp4", "videos/1/a.mp4", 1_700_000_000);
        assert_eq!(a, b);
        assert!(a.starts_with("/videos/1/a.mp4?expires=1700000000&signature="));
    }

    #[test]
    fn path_or_expiry_changes_signature() {
        let s = signer();
        let base = s.signature("videos/1/a.mp4", 1_700_000_000);
        assert_ne!(base, s.signature("videos/1/b.mp4", 1_700_000_000));
        assert_ne!(base, s.signature("videos/1/a.mp4", 1_700_000_001));
        assert_eq!(base.len(), 64);
    }

    #[test]
    fn matches_reference_hmac() {
        let s = UrlSigner::new("key").unwrap();
        let mut mac = HmacSha256::new_from_slice(b"key").unwrap();
        mac.update(b"a.mp4:100");
        assert_eq!(s.signature("a.mp4", 100), hex::encode(mac.finalize().into_bytes()));
    }

    #[test]
    fn existing_query_uses_ampersand() {
        let url = signer().sign_url("https://cdn.example.com/a.mp4?v=2", "a.mp4", 10);
        assert!(url.contains("?v=2&expires=10&signature="));
    }

    #[test]
    fn verify_accepts_valid_and_rejects_expired_or_tampered() {
        let s = signer();
        let sig = s.signature("a.mp4", 200);
        assert!(s.verify("a.mp4", 200, &sig, 100));
        assert!(!s.verify("a.mp4", 200, &sig, 201));
        assert!(!s.verify("b.mp4", 200, &sig, 100));
        assert!(!s.verify("a.mp4", 200, "not-hex", 100));
    }

    #[test]
    fn empty_secret_is_rejected() {
        assert!(UrlSigner::new("  ").is_err());
    }
}
