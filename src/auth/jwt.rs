//! JWKS-backed RS256 token verification.
//!
//! Keys are fetched from the identity provider's JWKS endpoint, cached by
//! `kid`, and refreshed by a background worker. On-demand verification only
//! reads the in-memory cache; the single exception is one forced refresh
//! when a token names an unknown `kid`. Refresh is all-or-nothing on the
//! lock-protected key map.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::config::AuthConfig;

const USER_AGENT: &str = concat!("blokus-server/", env!("CARGO_PKG_VERSION"));

/// Verification failure taxonomy. Every variant renders a distinct
/// human-readable reason.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JwtError {
    #[error("JWT verifier not initialized")]
    NotInitialized,
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("Key not found for kid: {0}")]
    KidNotFound(String),
    #[error("signature verification failed: {0}")]
    SignatureInvalid(String),
    #[error("issuer mismatch")]
    IssuerMismatch,
    #[error("Token doesn't contain any audience")]
    AudienceMissing,
    #[error("Token doesn't contain the required audience (token aud: [{token_aud}], allowed: [{allowed}])")]
    AudienceMismatch { token_aud: String, allowed: String },
    #[error("Token expired beyond grace period")]
    Expired,
    #[error("Token not yet valid")]
    NotYetValid,
    #[error("JWKS fetch failed: {0}")]
    Fetch(String),
}

/// Claims extracted from a successfully verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JwtClaims {
    pub sub: String,
    pub iss: String,
    pub aud: Vec<String>,
    pub preferred_username: Option<String>,
    pub email: Option<String>,
    pub iat: Option<i64>,
    pub exp: i64,
    pub nbf: Option<i64>,
    pub kid: String,
}

/// One cached JWKS entry.
#[derive(Debug, Clone)]
pub struct JwksKey {
    pub kid: String,
    pub kty: String,
    pub key_use: String,
    pub alg: String,
    pub n: String,
    pub e: String,
    pub cached_at: Instant,
}

#[derive(Debug, Deserialize)]
struct JwksDocument {
    keys: Vec<JwksDocumentKey>,
}

#[derive(Debug, Deserialize)]
struct JwksDocumentKey {
    #[serde(default)]
    kid: String,
    #[serde(default)]
    kty: String,
    #[serde(default, rename = "use")]
    key_use: String,
    #[serde(default)]
    alg: String,
    #[serde(default)]
    n: String,
    #[serde(default)]
    e: String,
}

/// `aud` may arrive as a single string or an array; both read as a set.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    fn into_vec(self) -> Vec<String> {
        match self {
            Audience::One(aud) => vec![aud],
            Audience::Many(auds) => auds,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawClaims {
    #[serde(default)]
    sub: String,
    #[serde(default)]
    iss: String,
    #[serde(default)]
    aud: Option<Audience>,
    #[serde(default)]
    preferred_username: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    iat: Option<i64>,
    exp: i64,
    #[serde(default)]
    nbf: Option<i64>,
}

#[derive(Default)]
struct KeyCache {
    keys: HashMap<String, JwksKey>,
    last_update: Option<Instant>,
}

pub struct JwtVerifier {
    jwks_url: String,
    issuer: String,
    audiences: Vec<String>,
    cache_ttl: Duration,
    grace_period: Duration,
    refresh_interval: Duration,
    http: reqwest::Client,
    cache: RwLock<KeyCache>,
    initialized: AtomicBool,
}

impl JwtVerifier {
    pub fn new(config: &AuthConfig) -> anyhow::Result<Self> {
        let jwks_url = config
            .jwks_url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("JWKS_URL is not configured"))?;
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.jwks_fetch_timeout_secs))
            .build()?;
        Ok(Self {
            jwks_url,
            issuer: config.jwt_issuer.clone(),
            audiences: config.jwt_audiences.clone(),
            cache_ttl: Duration::from_secs(config.jwks_cache_minutes * 60),
            grace_period: Duration::from_secs(config.jwt_grace_period_secs),
            refresh_interval: Duration::from_secs(config.jwks_refresh_interval_secs),
            http,
            cache: RwLock::new(KeyCache::default()),
            initialized: AtomicBool::new(false),
        })
    }

    /// Initial JWKS fetch. Must succeed before any token is accepted.
    pub async fn initialize(&self) -> Result<(), JwtError> {
        self.refresh_jwks_cache().await?;
        self.initialized.store(true, Ordering::SeqCst);
        tracing::info!(
            jwks_url = %self.jwks_url,
            issuer = %self.issuer,
            keys = self.cached_key_count().await,
            "JWT verifier initialized"
        );
        Ok(())
    }

    /// Spawn the background refresh worker. The worker wakes on the
    /// configured interval and refreshes only when the cache is stale.
    pub fn start_background_refresh(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let verifier = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(verifier.refresh_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick fires immediately; skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if verifier.is_cache_valid().await {
                    continue;
                }
                tracing::debug!("JWKS cache expired, refreshing in background");
                if let Err(err) = verifier.refresh_jwks_cache().await {
                    tracing::error!(error = %err, "Background JWKS refresh failed");
                }
            }
        })
    }

    pub async fn cached_key_count(&self) -> usize {
        self.cache.read().await.keys.len()
    }

    pub async fn is_cache_valid(&self) -> bool {
        let cache = self.cache.read().await;
        cache
            .last_update
            .is_some_and(|at| at.elapsed() < self.cache_ttl)
    }

    /// Fetch and parse the JWKS document, replacing the cached key map only
    /// on success.
    pub async fn refresh_jwks_cache(&self) -> Result<(), JwtError> {
        let body = self.fetch_jwks().await?;
        let document: JwksDocument = serde_json::from_str(&body)
            .map_err(|err| JwtError::Fetch(format!("invalid JWKS JSON: {err}")))?;

        let now = Instant::now();
        let mut parsed = HashMap::new();
        for key in document.keys {
            if key.kid.is_empty() || key.kty != "RSA" || key.n.is_empty() || key.e.is_empty() {
                tracing::warn!(kid = %key.kid, kty = %key.kty, "Skipping JWKS key with missing fields");
                continue;
            }
            parsed.insert(
                key.kid.clone(),
                JwksKey {
                    kid: key.kid,
                    kty: key.kty,
                    key_use: key.key_use,
                    alg: key.alg,
                    n: key.n,
                    e: key.e,
                    cached_at: now,
                },
            );
        }

        if parsed.is_empty() {
            return Err(JwtError::Fetch("JWKS contained no usable RSA keys".into()));
        }

        let mut cache = self.cache.write().await;
        cache.keys = parsed;
        cache.last_update = Some(now);
        tracing::debug!(keys = cache.keys.len(), "JWKS cache refreshed");
        Ok(())
    }

    async fn fetch_jwks(&self) -> Result<String, JwtError> {
        let response = self
            .http
            .get(&self.jwks_url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|err| JwtError::Fetch(err.to_string()))?;

        if !response.status().is_success() {
            return Err(JwtError::Fetch(format!("HTTP {}", response.status())));
        }
        let body = response
            .text()
            .await
            .map_err(|err| JwtError::Fetch(err.to_string()))?;
        if body.is_empty() {
            return Err(JwtError::Fetch("empty JWKS response".into()));
        }
        Ok(body)
    }

    async fn get_key(&self, kid: &str) -> Option<JwksKey> {
        self.cache.read().await.keys.get(kid).cloned()
    }

    /// Verify an access token against the cached keys.
    pub async fn verify(&self, token: &str) -> Result<JwtClaims, JwtError> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(JwtError::NotInitialized);
        }

        let kid = extract_kid(token)?;

        let key = match self.get_key(&kid).await {
            Some(key) => key,
            None => {
                // One forced refresh, then give up on this kid.
                tracing::info!(%kid, "Unknown kid, forcing JWKS refresh");
                if let Err(err) = self.refresh_jwks_cache().await {
                    tracing::warn!(error = %err, "Forced JWKS refresh failed");
                }
                self.get_key(&kid)
                    .await
                    .ok_or_else(|| JwtError::KidNotFound(kid.clone()))?
            }
        };

        self.verify_with_key(token, &key)
    }

    fn verify_with_key(&self, token: &str, key: &JwksKey) -> Result<JwtClaims, JwtError> {
        let pem = jwk_to_pem(&key.n, &key.e)?;
        let decoding_key = DecodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|err| JwtError::Malformed(format!("bad public key: {err}")))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.set_issuer(&[self.issuer.as_str()]);

        let data = jsonwebtoken::decode::<RawClaims>(token, &decoding_key, &validation)
            .map_err(|err| match err.kind() {
                jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                    JwtError::SignatureInvalid(err.to_string())
                }
                jsonwebtoken::errors::ErrorKind::InvalidIssuer => JwtError::IssuerMismatch,
                _ => JwtError::Malformed(err.to_string()),
            })?;

        let raw = data.claims;
        let aud = raw.aud.map(Audience::into_vec).unwrap_or_default();
        check_audience(&self.audiences, &aud)?;
        check_time_window(
            raw.exp,
            raw.nbf,
            Utc::now().timestamp(),
            self.grace_period.as_secs() as i64,
        )?;

        Ok(JwtClaims {
            sub: raw.sub,
            iss: raw.iss,
            aud,
            preferred_username: raw.preferred_username,
            email: raw.email,
            iat: raw.iat,
            exp: raw.exp,
            nbf: raw.nbf,
            kid: key.kid.clone(),
        })
    }
}

/// Base64url decode with padding tolerance.
pub(crate) fn base64url_decode(input: &str) -> Result<Vec<u8>, JwtError> {
    URL_SAFE_NO_PAD
        .decode(input.trim_end_matches('='))
        .map_err(|err| JwtError::Malformed(format!("base64url decode failed: {err}")))
}

/// Pull the `kid` out of the token header (first dot-separated segment).
pub(crate) fn extract_kid(token: &str) -> Result<String, JwtError> {
    let header_b64 = token
        .split('.')
        .next()
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| JwtError::Malformed("token has no header segment".into()))?;
    let header_json = base64url_decode(header_b64)?;
    let header: serde_json::Value = serde_json::from_slice(&header_json)
        .map_err(|err| JwtError::Malformed(format!("header is not JSON: {err}")))?;
    header
        .get("kid")
        .and_then(|kid| kid.as_str())
        .map(str::to_string)
        .ok_or_else(|| JwtError::Malformed("header has no kid".into()))
}

/// Set-membership audience check. An empty allow-list skips the check; a
/// token without any `aud` fails when the allow-list is non-empty.
pub(crate) fn check_audience(allowed: &[String], token_aud: &[String]) -> Result<(), JwtError> {
    if allowed.is_empty() {
        return Ok(());
    }
    if token_aud.is_empty() {
        return Err(JwtError::AudienceMissing);
    }
    if token_aud.iter().any(|aud| allowed.contains(aud)) {
        Ok(())
    } else {
        Err(JwtError::AudienceMismatch {
            token_aud: token_aud.join(", "),
            allowed: allowed.join(", "),
        })
    }
}

/// Grace-period window: the token must satisfy
/// `now ∈ [nbf - grace, exp + grace]`.
pub(crate) fn check_time_window(
    exp: i64,
    nbf: Option<i64>,
    now: i64,
    grace_secs: i64,
) -> Result<(), JwtError> {
    if exp + grace_secs < now {
        return Err(JwtError::Expired);
    }
    if let Some(nbf) = nbf {
        if nbf - grace_secs > now {
            return Err(JwtError::NotYetValid);
        }
    }
    Ok(())
}

/// Convert JWK `(n, e)` into a PKCS#1 RSA public key PEM: an ASN.1
/// SEQUENCE of two INTEGERs, base64-encoded with 64-char line wrapping.
pub(crate) fn jwk_to_pem(n_b64: &str, e_b64: &str) -> Result<String, JwtError> {
    let n = base64url_decode(n_b64)?;
    let e = base64url_decode(e_b64)?;

    fn encode_length(der: &mut Vec<u8>, len: usize) {
        if len < 128 {
            der.push(len as u8);
        } else if len <= 0xFF {
            der.push(0x81);
            der.push(len as u8);
        } else if len <= 0xFFFF {
            der.push(0x82);
            der.push((len >> 8) as u8);
            der.push((len & 0xFF) as u8);
        } else {
            der.push(0x83);
            der.push((len >> 16) as u8);
            der.push(((len >> 8) & 0xFF) as u8);
            der.push((len & 0xFF) as u8);
        }
    }

    fn encode_integer(der: &mut Vec<u8>, value: &[u8]) {
        der.push(0x02);
        // A set high bit would read as negative; prepend 0x00.
        let needs_padding = value.first().is_some_and(|byte| byte & 0x80 != 0);
        encode_length(der, value.len() + usize::from(needs_padding));
        if needs_padding {
            der.push(0x00);
        }
        der.extend_from_slice(value);
    }

    let mut content = Vec::with_capacity(n.len() + e.len() + 16);
    encode_integer(&mut content, &n);
    encode_integer(&mut content, &e);

    let mut der = Vec::with_capacity(content.len() + 8);
    der.push(0x30);
    encode_length(&mut der, content.len());
    der.extend_from_slice(&content);

    let body = STANDARD.encode(&der);
    let mut pem = String::from("-----BEGIN RSA PUBLIC KEY-----\n");
    for chunk in body.as_bytes().chunks(64) {
        // base64 output is always ASCII.
        pem.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        pem.push('\n');
    }
    pem.push_str("-----END RSA PUBLIC KEY-----\n");
    Ok(pem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64url_decode_padding_tolerance() {
        // "ab" encodes to "YWI" unpadded, "YWI=" padded.
        assert_eq!(base64url_decode("YWI").unwrap(), b"ab");
        assert_eq!(base64url_decode("YWI=").unwrap(), b"ab");
        assert!(base64url_decode("not base64!!").is_err());
    }

    #[test]
    fn test_extract_kid() {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","kid":"key-1"}"#);
        let token = format!("{header}.payload.signature");
        assert_eq!(extract_kid(&token).unwrap(), "key-1");
    }

    #[test]
    fn test_extract_kid_missing() {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256"}"#);
        let token = format!("{header}.payload.signature");
        assert!(matches!(
            extract_kid(&token),
            Err(JwtError::Malformed(_))
        ));
        assert!(extract_kid("").is_err());
        assert!(extract_kid("!!!.x.y").is_err());
    }

    #[test]
    fn test_check_audience_empty_allowlist_skips() {
        assert!(check_audience(&[], &[]).is_ok());
        assert!(check_audience(&[], &["anyone".into()]).is_ok());
    }

    #[test]
    fn test_check_audience_membership() {
        let allowed = vec!["game".to_string(), "account".to_string()];
        assert!(check_audience(&allowed, &["game".into()]).is_ok());
        assert!(check_audience(&allowed, &["other".into(), "account".into()]).is_ok());

        assert_eq!(
            check_audience(&allowed, &[]),
            Err(JwtError::AudienceMissing)
        );
        assert!(matches!(
            check_audience(&allowed, &["other".into()]),
            Err(JwtError::AudienceMismatch { .. })
        ));
    }

    #[test]
    fn test_check_time_window_grace() {
        let now = 1_000_000;
        // Expired 10s ago, 30s grace: fine.
        assert!(check_time_window(now - 10, None, now, 30).is_ok());
        // Expired 31s ago: rejected.
        assert_eq!(
            check_time_window(now - 31, None, now, 30),
            Err(JwtError::Expired)
        );
        // nbf 10s in the future, 30s grace: fine.
        assert!(check_time_window(now + 3600, Some(now + 10), now, 30).is_ok());
        // nbf 31s in the future: rejected.
        assert_eq!(
            check_time_window(now + 3600, Some(now + 31), now, 30),
            Err(JwtError::NotYetValid)
        );
    }

    #[test]
    fn test_jwk_to_pem_der_structure() {
        let n = URL_SAFE_NO_PAD.encode([0x01, 0x02, 0x03]);
        let e = URL_SAFE_NO_PAD.encode([0x01, 0x00, 0x01]);
        let pem = jwk_to_pem(&n, &e).unwrap();

        assert!(pem.starts_with("-----BEGIN RSA PUBLIC KEY-----\n"));
        assert!(pem.ends_with("-----END RSA PUBLIC KEY-----\n"));

        let body: String = pem
            .lines()
            .filter(|line| !line.starts_with("-----"))
            .collect();
        let der = STANDARD.decode(body).unwrap();
        assert_eq!(
            der,
            vec![0x30, 0x0A, 0x02, 0x03, 0x01, 0x02, 0x03, 0x02, 0x03, 0x01, 0x00, 0x01]
        );
    }

    #[test]
    fn test_jwk_to_pem_pads_high_bit_integers() {
        let n = URL_SAFE_NO_PAD.encode([0x80]);
        let e = URL_SAFE_NO_PAD.encode([0x03]);
        let pem = jwk_to_pem(&n, &e).unwrap();
        let body: String = pem
            .lines()
            .filter(|line| !line.starts_with("-----"))
            .collect();
        let der = STANDARD.decode(body).unwrap();
        // INTEGER 0x0080 keeps the value positive.
        assert_eq!(der, vec![0x30, 0x07, 0x02, 0x02, 0x00, 0x80, 0x02, 0x01, 0x03]);
    }

    #[test]
    fn test_jwk_to_pem_wraps_long_lines() {
        // A realistic 256-byte modulus produces a body longer than one line.
        let n = URL_SAFE_NO_PAD.encode(vec![0x7Fu8; 256]);
        let e = URL_SAFE_NO_PAD.encode([0x01, 0x00, 0x01]);
        let pem = jwk_to_pem(&n, &e).unwrap();
        for line in pem.lines().filter(|line| !line.starts_with("-----")) {
            assert!(line.len() <= 64, "body lines are wrapped at 64 chars");
        }
        assert!(pem.lines().count() > 4);
    }

    #[tokio::test]
    async fn test_verifier_rejects_before_initialize() {
        let config = AuthConfig {
            jwks_url: Some("http://127.0.0.1:1/jwks".to_string()),
            jwt_issuer: "issuer".to_string(),
            ..AuthConfig::default()
        };
        let verifier = JwtVerifier::new(&config).unwrap();
        assert_eq!(
            verifier.verify("a.b.c").await.unwrap_err(),
            JwtError::NotInitialized
        );
    }

    #[tokio::test]
    async fn test_initialize_fails_when_endpoint_unreachable() {
        let config = AuthConfig {
            jwks_url: Some("http://127.0.0.1:1/jwks".to_string()),
            jwt_issuer: "issuer".to_string(),
            jwks_fetch_timeout_secs: 1,
            ..AuthConfig::default()
        };
        let verifier = JwtVerifier::new(&config).unwrap();
        assert!(matches!(
            verifier.initialize().await,
            Err(JwtError::Fetch(_))
        ));
    }
}
