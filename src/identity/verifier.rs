//! Token verification against the identity provider.
//!
//! `CognitoVerifier` checks RS256 signatures with the user pool's published JWKS,
//! then issuer, expiry and the client the token was minted for. Keys are fetched
//! lazily and refetched when an unknown `kid` shows up (key rotation), at most
//! once per refresh interval so unknown kids cannot drive outbound traffic.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::AuthError;

/// Minimum spacing between two key-set fetches triggered by unknown kids.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Verifies a bearer token and returns its payload.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Map<String, Value>, AuthError>;
}

/// User-pool coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CognitoSettings {
    pub region: String,
    pub user_pool_id: String,
    pub client_id: String,
}

impl CognitoSettings {
    pub fn issuer(&self) -> String {
        format!("https://cognito-idp.{}.amazonaws.com/{}", self.region, self.user_pool_id)
    }

    pub fn jwks_url(&self) -> String { format!("{}/.well-known/jwks.json", self.issuer()) }
}

/// A JSON Web Key Set as published by the provider.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    pub kid: String,
    pub kty: String,
    pub n: String,
    pub e: String,
}

pub struct CognitoVerifier {
    settings: CognitoSettings,
    jwks_url: String,
    http: reqwest::Client,
    keys: RwLock<HashMap<String, DecodingKey>>,
    last_refresh: Mutex<Option<Instant>>,
    refresh_interval: Duration,
}

impl CognitoVerifier {
    pub fn new(settings: CognitoSettings, timeout: Duration) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Provider(e.to_string()))?;
        let jwks_url = settings.jwks_url();
        Ok(Self {
            settings,
            jwks_url,
            http,
            keys: RwLock::new(HashMap::new()),
            last_refresh: Mutex::new(None),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        })
    }

    /// Verifier with a pre-loaded key set. Unknown `kid`s still trigger a fetch.
    pub fn with_jwks(settings: CognitoSettings, jwks: Jwks, timeout: Duration) -> Result<Self, AuthError> {
        let verifier = Self::new(settings, timeout)?;
        verifier.install(jwks);
        Ok(verifier)
    }

    /// Fetch keys from somewhere other than the pool's well-known URL.
    pub fn with_jwks_url(mut self, url: impl Into<String>) -> Self {
        self.jwks_url = url.into();
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn settings(&self) -> &CognitoSettings { &self.settings }

    fn install(&self, jwks: Jwks) -> usize {
        let mut keys = self.keys.write();
        for jwk in jwks.keys.into_iter().filter(|k| k.kty == "RSA") {
            match DecodingKey::from_rsa_components(&jwk.n, &jwk.e) {
                Ok(key) => { keys.insert(jwk.kid, key); }
                Err(e) => debug!(target: "chanchito::identity", kid = %jwk.kid, "skipping unusable jwk: {e}"),
            }
        }
        keys.len()
    }

    async fn refresh(&self) -> Result<(), AuthError> {
        let resp = self
            .http
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| AuthError::Provider(format!("jwks fetch: {e}")))?;
        if !resp.status().is_success() {
            return Err(AuthError::Provider(format!("jwks fetch: HTTP {}", resp.status())));
        }
        let jwks: Jwks = resp.json().await.map_err(|e| AuthError::Provider(format!("jwks decode: {e}")))?;
        let count = self.install(jwks);
        info!(target: "chanchito::identity", keys = count, url = %self.jwks_url, "loaded signing keys");
        Ok(())
    }

    /// Takes the refresh slot if the interval since the last attempt has elapsed.
    /// Failed fetches count as attempts.
    fn claim_refresh(&self) -> bool {
        let mut last = self.last_refresh.lock();
        match *last {
            Some(at) if at.elapsed() < self.refresh_interval => false,
            _ => {
                *last = Some(Instant::now());
                true
            }
        }
    }

    async fn key(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        let cached = self.keys.read().get(kid).cloned();
        if let Some(key) = cached {
            return Ok(key);
        }
        if !self.claim_refresh() {
            debug!(target: "chanchito::identity", %kid, "unknown kid inside refresh interval");
            return Err(AuthError::UnknownKey(kid.to_string()));
        }
        self.refresh().await?;
        self.keys.read().get(kid).cloned().ok_or_else(|| AuthError::UnknownKey(kid.to_string()))
    }
}

#[async_trait]
impl TokenVerifier for CognitoVerifier {
    async fn verify(&self, token: &str) -> Result<Map<String, Value>, AuthError> {
        let header = decode_header(token).map_err(|e| AuthError::Malformed(e.to_string()))?;
        if header.alg != Algorithm::RS256 {
            return Err(AuthError::Malformed(format!("unsupported algorithm {:?}", header.alg)));
        }
        let kid = header.kid.ok_or_else(|| AuthError::Malformed("missing kid".into()))?;
        let key = self.key(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[self.settings.issuer()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.validate_aud = false;
        let data = decode::<Map<String, Value>>(token, &key, &validation).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            ErrorKind::InvalidSignature => AuthError::InvalidSignature,
            ErrorKind::InvalidIssuer => AuthError::WrongIssuer,
            _ => AuthError::Malformed(e.to_string()),
        })?;
        check_client(&data.claims, &self.settings.client_id)?;
        Ok(data.claims)
    }
}

/// Access tokens name the client in `client_id`, ID tokens in `aud`.
fn check_client(claims: &Map<String, Value>, client_id: &str) -> Result<(), AuthError> {
    let field = match claims.get("token_use").and_then(Value::as_str) {
        Some("access") => "client_id",
        Some("id") => "aud",
        other => return Err(AuthError::Malformed(format!("unsupported token_use {other:?}"))),
    };
    let matches = match claims.get(field) {
        Some(Value::String(s)) => s == client_id,
        Some(Value::Array(items)) => items.iter().any(|v| v.as_str() == Some(client_id)),
        _ => false,
    };
    if matches { Ok(()) } else { Err(AuthError::WrongClient) }
}
