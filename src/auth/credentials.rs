//! Bearer credential extraction and verification
//!
//! The relay only consumes verified claims. [`Verifier`] is the seam for
//! whatever checks a credential's signature; [`HmacVerifier`] is the in-tree
//! implementation for HMAC-SHA256 signed compact tokens.

use crate::auth::keys::KeySet;
use crate::auth::realms::RealmRegistry;
use crate::auth::token::AuthorizationToken;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{Map, Value};
use sha2::Sha256;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::debug;

pub const AUTHORIZATION_HEADER: &str = "authorization";
pub const BEARER_PREFIX: &str = "Bearer ";
pub const HS256: &str = "HS256";
/// Unqualified name of the claim carrying the challenge timeout, in seconds
pub const DEFAULT_CHALLENGE_TIMEOUT_CLAIM: &str = "challenge_timeout";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("unknown key '{0}'")]
    UnknownKey(String),

    #[error("unsupported algorithm '{0}'")]
    UnsupportedAlgorithm(String),

    #[error("invalid token signature")]
    InvalidSignature,

    #[error("token expired")]
    Expired,

    #[error("token not yet valid")]
    NotYetValid,
}

/// Claims produced by a successful verification
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Claims {
    /// Identifier of the signing key; names the realm
    pub key_id: String,
    pub issuer: Option<String>,
    pub audience: Vec<String>,
    /// Space-separated scope claim
    pub scope: Option<String>,
    /// Seconds before expiry at which the credential should be challenged
    pub challenge_timeout: Option<u64>,
}

impl Claims {
    pub fn scopes(&self) -> Vec<&str> {
        self.scope
            .as_deref()
            .map(|s| s.split_whitespace().collect())
            .unwrap_or_default()
    }
}

/// Validates a raw bearer credential and yields its claims
pub trait Verifier: Send + Sync {
    fn verify(&self, raw_token: &str) -> Result<Claims, VerifyError>;
}

#[derive(Debug, Deserialize)]
struct TokenHeader {
    alg: String,
    kid: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct TokenPayload {
    iss: Option<String>,
    aud: Option<Audience>,
    scope: Option<String>,
    /// NumericDate values may carry fractional seconds
    exp: Option<f64>,
    nbf: Option<f64>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str) -> Result<T, VerifyError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| VerifyError::Malformed(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| VerifyError::Malformed(e.to_string()))
}

/// Verifies `header.payload.signature` tokens signed with HMAC-SHA256
/// against the `k` member of the key named by the token's `kid`.
#[derive(Debug, Clone)]
pub struct HmacVerifier {
    keys: Arc<KeySet>,
    /// Fully qualified (namespaced) challenge timeout claim name
    challenge_timeout_claim: String,
}

impl HmacVerifier {
    pub fn new(keys: Arc<KeySet>) -> Self {
        Self {
            keys,
            challenge_timeout_claim: DEFAULT_CHALLENGE_TIMEOUT_CLAIM.to_string(),
        }
    }

    /// Read the challenge timeout from `claim` instead of the default name
    pub fn with_challenge_timeout_claim(mut self, claim: impl Into<String>) -> Self {
        self.challenge_timeout_claim = claim.into();
        self
    }

    pub fn challenge_timeout_claim(&self) -> &str {
        &self.challenge_timeout_claim
    }

    fn mac(&self, kid: &str) -> Result<HmacSha256, VerifyError> {
        let key = self
            .keys
            .get(kid)
            .ok_or_else(|| VerifyError::UnknownKey(kid.to_string()))?;

        if key.alg() != HS256 {
            return Err(VerifyError::UnsupportedAlgorithm(key.alg().to_string()));
        }

        let secret = key
            .param("k")
            .ok_or_else(|| VerifyError::Malformed(format!("key '{kid}' has no k")))?;
        let secret = URL_SAFE_NO_PAD
            .decode(secret)
            .map_err(|e| VerifyError::Malformed(e.to_string()))?;

        HmacSha256::new_from_slice(&secret).map_err(|e| VerifyError::Malformed(e.to_string()))
    }

    /// Mint a token for `claims` signed by key `kid`
    pub fn sign(&self, kid: &str, claims: &serde_json::Value) -> Result<String, VerifyError> {
        let header = serde_json::json!({ "alg": HS256, "typ": "JWT", "kid": kid });
        let header = URL_SAFE_NO_PAD.encode(header.to_string());
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());

        let mut mac = self.mac(kid)?;
        mac.update(header.as_bytes());
        mac.update(b".");
        mac.update(payload.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{header}.{payload}.{signature}"))
    }
}

impl Verifier for HmacVerifier {
    fn verify(&self, raw_token: &str) -> Result<Claims, VerifyError> {
        let mut segments = raw_token.split('.');
        let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) =
            (segments.next(), segments.next(), segments.next(), segments.next())
        else {
            return Err(VerifyError::Malformed("expected three segments".to_string()));
        };

        let header: TokenHeader = decode_segment(header_b64)?;
        if header.alg != HS256 {
            return Err(VerifyError::UnsupportedAlgorithm(header.alg));
        }
        let kid = header
            .kid
            .ok_or_else(|| VerifyError::Malformed("missing kid".to_string()))?;

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|e| VerifyError::Malformed(e.to_string()))?;

        let mut mac = self.mac(&kid)?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(payload_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| VerifyError::InvalidSignature)?;

        let payload: TokenPayload = decode_segment(payload_b64)?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        if payload.exp.is_some_and(|exp| exp <= now) {
            return Err(VerifyError::Expired);
        }
        if payload.nbf.is_some_and(|nbf| nbf > now) {
            return Err(VerifyError::NotYetValid);
        }

        let audience = match payload.aud {
            Some(Audience::One(aud)) => vec![aud],
            Some(Audience::Many(auds)) => auds,
            None => Vec::new(),
        };

        let challenge_timeout = payload
            .extra
            .get(&self.challenge_timeout_claim)
            .and_then(Value::as_u64);

        Ok(Claims {
            key_id: kid,
            issuer: payload.iss,
            audience,
            scope: payload.scope,
            challenge_timeout,
        })
    }
}

/// Locate a bearer credential among stream-opening headers
pub fn bearer_token<'a>(headers: impl IntoIterator<Item = (&'a str, &'a str)>) -> Option<&'a str> {
    headers.into_iter().find_map(|(name, value)| {
        if !name.eq_ignore_ascii_case(AUTHORIZATION_HEADER) {
            return None;
        }
        let scheme = value.get(..BEARER_PREFIX.len())?;
        if !scheme.eq_ignore_ascii_case(BEARER_PREFIX) {
            return None;
        }
        let token = value[BEARER_PREFIX.len()..].trim();
        (!token.is_empty()).then_some(token)
    })
}

/// Turns stream-opening headers into an authorization token
#[derive(Clone)]
pub struct CredentialExtractor {
    verifier: Option<Arc<dyn Verifier>>,
    realms: Arc<RealmRegistry>,
}

impl CredentialExtractor {
    pub fn new(verifier: Option<Arc<dyn Verifier>>, realms: Arc<RealmRegistry>) -> Self {
        Self { verifier, realms }
    }

    /// Authorization for the given headers, or [`AuthorizationToken::NONE`]
    /// when no credential is present or it cannot be verified.
    pub fn authorize<'a>(&self, headers: impl IntoIterator<Item = (&'a str, &'a str)>) -> AuthorizationToken {
        let Some(raw_token) = bearer_token(headers) else {
            return AuthorizationToken::NONE;
        };

        let Some(verifier) = &self.verifier else {
            debug!("Bearer credential present but no verifier configured");
            return AuthorizationToken::NONE;
        };

        match verifier.verify(raw_token) {
            Ok(claims) => {
                let authorization = self.realms.lookup_claims(&claims);
                debug!(
                    kid = %claims.key_id,
                    issuer = ?claims.issuer,
                    authorization = %authorization,
                    "Bearer credential verified"
                );
                authorization
            }
            Err(e) => {
                debug!(error = %e, "Bearer credential rejected");
                AuthorizationToken::NONE
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key_set() -> Arc<KeySet> {
        let k = URL_SAFE_NO_PAD.encode(b"test-secret-key-for-signing");
        let json = format!(
            r#"{{"keys":[
                {{"kid":"svcA","alg":"HS256","kty":"oct","k":"{k}"}},
                {{"kid":"rsa","alg":"RS256","kty":"RSA"}}
            ]}}"#
        );
        Arc::new(KeySet::parse(json.as_bytes()).unwrap())
    }

    #[test]
    fn test_sign_and_verify() {
        let verifier = HmacVerifier::new(key_set());
        let token = verifier
            .sign("svcA", &json!({ "iss": "idp1", "aud": ["a", "b"], "scope": "read  write" }))
            .unwrap();

        let claims = verifier.verify(&token).unwrap();
        assert_eq!(claims.key_id, "svcA");
        assert_eq!(claims.issuer.as_deref(), Some("idp1"));
        assert_eq!(claims.audience, vec!["a", "b"]);
        assert_eq!(claims.scopes(), vec!["read", "write"]);
    }

    #[test]
    fn test_single_audience() {
        let verifier = HmacVerifier::new(key_set());
        let token = verifier.sign("svcA", &json!({ "aud": "orders" })).unwrap();

        let claims = verifier.verify(&token).unwrap();
        assert_eq!(claims.audience, vec!["orders"]);
        assert!(claims.scopes().is_empty());
    }

    #[test]
    fn test_tampered_signature() {
        let verifier = HmacVerifier::new(key_set());
        let token = verifier.sign("svcA", &json!({ "scope": "read" })).unwrap();
        let forged_payload = URL_SAFE_NO_PAD.encode(json!({ "scope": "admin" }).to_string());

        let mut parts: Vec<&str> = token.split('.').collect();
        parts[1] = &forged_payload;
        let forged = parts.join(".");

        assert!(matches!(verifier.verify(&forged), Err(VerifyError::InvalidSignature)));
    }

    #[test]
    fn test_expired() {
        let verifier = HmacVerifier::new(key_set());
        let token = verifier.sign("svcA", &json!({ "exp": 1 })).unwrap();
        assert!(matches!(verifier.verify(&token), Err(VerifyError::Expired)));

        let token = verifier.sign("svcA", &json!({ "exp": u32::MAX })).unwrap();
        assert!(verifier.verify(&token).is_ok());
    }

    #[test]
    fn test_fractional_numeric_dates() {
        let verifier = HmacVerifier::new(key_set());

        let token = verifier.sign("svcA", &json!({ "exp": 4102444800.5 })).unwrap();
        assert!(verifier.verify(&token).is_ok());

        let token = verifier.sign("svcA", &json!({ "exp": 1.25 })).unwrap();
        assert!(matches!(verifier.verify(&token), Err(VerifyError::Expired)));
    }

    #[test]
    fn test_not_before() {
        let verifier = HmacVerifier::new(key_set());

        let token = verifier.sign("svcA", &json!({ "nbf": 4102444800u64 })).unwrap();
        assert!(matches!(verifier.verify(&token), Err(VerifyError::NotYetValid)));

        let token = verifier.sign("svcA", &json!({ "nbf": 1.5 })).unwrap();
        assert!(verifier.verify(&token).is_ok());
    }

    #[test]
    fn test_namespaced_challenge_timeout() {
        let verifier = HmacVerifier::new(key_set())
            .with_challenge_timeout_claim("https://example.com/challenge_timeout");

        let token = verifier
            .sign(
                "svcA",
                &json!({ "https://example.com/challenge_timeout": 30, "challenge_timeout": 5 }),
            )
            .unwrap();
        assert_eq!(verifier.verify(&token).unwrap().challenge_timeout, Some(30));

        let token = verifier.sign("svcA", &json!({ "challenge_timeout": 5 })).unwrap();
        assert_eq!(verifier.verify(&token).unwrap().challenge_timeout, None);
    }

    #[test]
    fn test_default_challenge_timeout_claim() {
        let verifier = HmacVerifier::new(key_set());
        assert_eq!(verifier.challenge_timeout_claim(), DEFAULT_CHALLENGE_TIMEOUT_CLAIM);

        let token = verifier.sign("svcA", &json!({ "challenge_timeout": 5 })).unwrap();
        assert_eq!(verifier.verify(&token).unwrap().challenge_timeout, Some(5));
    }

    #[test]
    fn test_unknown_and_unsupported_keys() {
        let verifier = HmacVerifier::new(key_set());

        assert!(matches!(
            verifier.sign("missing", &json!({})),
            Err(VerifyError::UnknownKey(kid)) if kid == "missing"
        ));
        assert!(matches!(
            verifier.sign("rsa", &json!({})),
            Err(VerifyError::UnsupportedAlgorithm(_))
        ));
        assert!(matches!(verifier.verify("abc"), Err(VerifyError::Malformed(_))));
        assert!(matches!(verifier.verify("a.b.c.d"), Err(VerifyError::Malformed(_))));
    }

    #[test]
    fn test_bearer_token_extraction() {
        let headers = [(":method", "GET"), ("Authorization", "Bearer abc.def.ghi")];
        assert_eq!(bearer_token(headers), Some("abc.def.ghi"));

        assert_eq!(bearer_token([("authorization", "Basic dXNlcjpwYXNz")]), None);
        assert_eq!(bearer_token([("authorization", "Bearer ")]), None);
        assert_eq!(bearer_token([("x-authorization", "Bearer abc")]), None);
        assert_eq!(bearer_token([("authorization", "bearer xyz")]), Some("xyz"));
    }

    #[test]
    fn test_authorize() {
        let keys = key_set();
        let verifier = Arc::new(HmacVerifier::new(keys));
        let realms = Arc::new(RealmRegistry::new());
        let expected = realms.resolve("svcA", Some("idp1"), None, &["invoke"]);

        let extractor = CredentialExtractor::new(Some(verifier.clone()), realms);
        let token = verifier
            .sign("svcA", &json!({ "iss": "idp1", "scope": "invoke other" }))
            .unwrap();
        let header = format!("Bearer {token}");

        assert_eq!(extractor.authorize([("authorization", header.as_str())]), expected);
        assert!(extractor.authorize([("authorization", "Bearer junk")]).is_none());
        assert!(extractor.authorize(std::iter::empty()).is_none());
    }

    #[test]
    fn test_authorize_without_verifier() {
        let realms = Arc::new(RealmRegistry::new());
        realms.resolve_realm("svcA");
        let extractor = CredentialExtractor::new(None, realms);

        assert!(extractor.authorize([("authorization", "Bearer abc")]).is_none());
    }
}
