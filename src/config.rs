//! Process configuration, read once from the environment at startup.
//!
//! `from_lookup` takes any key -> value function so tests can inject settings
//! without touching the process environment.

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::time::Duration;

use thiserror::Error;

use crate::identity::CognitoSettings;
use crate::storage::fauna::DEFAULT_ENDPOINT;
use crate::storage::ExecutionMode;

pub const DEFAULT_HTTP_PORT: u16 = 8000;
pub const DEFAULT_REDIRECT_URI: &str = "https://api.chanchito.net/login/token";
pub const DEFAULT_UPSTREAM_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Fauna { endpoint: String, secret: String },
    Memory,
}

impl Debug for StoreBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreBackend::Fauna { endpoint, .. } => f.debug_struct("Fauna").field("endpoint", endpoint).finish_non_exhaustive(),
            StoreBackend::Memory => f.write_str("Memory"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub mode: ExecutionMode,
    pub timeout: Duration,
}

#[derive(Clone, PartialEq, Eq)]
pub struct IdentityConfig {
    pub cognito: CognitoSettings,
    pub client_secret: Option<String>,
    /// Hosted-UI domain for the authorization-code exchange; `/login/token` is
    /// unavailable without it.
    pub domain: Option<String>,
    pub redirect_uri: String,
}

impl Debug for IdentityConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityConfig")
            .field("cognito", &self.cognito)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("domain", &self.domain)
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub http_port: u16,
    pub identity: IdentityConfig,
    pub store: StoreConfig,
    pub upstream_timeout: Duration,
    /// Put resource routes behind the bearer gate.
    pub protect_resources: bool,
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_lookup(|k| vars.get(k).cloned())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |k: &'static str| get(k).ok_or(ConfigError::Missing(k));

        let http_port = parse_or("CHANCHITO_HTTP_PORT", get("CHANCHITO_HTTP_PORT"), DEFAULT_HTTP_PORT)?;
        let timeout_ms = parse_or("UPSTREAM_TIMEOUT_MS", get("UPSTREAM_TIMEOUT_MS"), DEFAULT_UPSTREAM_TIMEOUT_MS)?;
        if timeout_ms == 0 {
            return Err(ConfigError::Invalid { key: "UPSTREAM_TIMEOUT_MS", reason: "must be positive".into() });
        }
        let upstream_timeout = Duration::from_millis(timeout_ms);
        let protect_resources = parse_bool("PROTECT_RESOURCES", get("PROTECT_RESOURCES"), true)?;

        let identity = IdentityConfig {
            cognito: CognitoSettings {
                region: required("AWS_REGION_NAME")?,
                user_pool_id: required("AWS_USER_POOL_ID")?,
                client_id: required("AWS_APP_CLIENT_ID")?,
            },
            client_secret: get("AWS_APP_CLIENT_SECRET"),
            domain: get("COGNITO_DOMAIN"),
            redirect_uri: get("OAUTH_REDIRECT_URI").unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string()),
        };

        let backend = match get("STORE_BACKEND").as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("fauna") => StoreBackend::Fauna {
                endpoint: get("FAUNA_ENDPOINT").unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
                secret: required("FAUNA_SECRET")?,
            },
            Some("memory") => StoreBackend::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid { key: "STORE_BACKEND", reason: format!("expected 'fauna' or 'memory', got '{other}'") })
            }
        };
        let mode = match get("STORE_MODE") {
            None => ExecutionMode::default(),
            Some(v) => v.parse().map_err(|reason| ConfigError::Invalid { key: "STORE_MODE", reason })?,
        };

        Ok(Self {
            http_port,
            identity,
            store: StoreConfig { backend, mode, timeout: upstream_timeout },
            upstream_timeout,
            protect_resources,
        })
    }
}

fn parse_or<T: std::str::FromStr>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(v) => v.parse().map_err(|e: T::Err| ConfigError::Invalid { key, reason: format!("'{v}': {e}") }),
    }
}

fn parse_bool(key: &'static str, raw: Option<String>, default: bool) -> Result<bool, ConfigError> {
    match raw.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(ConfigError::Invalid { key, reason: format!("'{other}' is not a boolean") }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> HashMap<String, String> {
        [
            ("AWS_REGION_NAME", "us-east-1"),
            ("AWS_USER_POOL_ID", "us-east-1_TEST"),
            ("AWS_APP_CLIENT_ID", "client-1"),
            ("AWS_APP_CLIENT_SECRET", "shh"),
            ("FAUNA_SECRET", "fnSecret"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn defaults() {
        let cfg = ApiConfig::from_map(&base()).unwrap();
        assert_eq!(cfg.http_port, DEFAULT_HTTP_PORT);
        assert_eq!(cfg.identity.redirect_uri, DEFAULT_REDIRECT_URI);
        assert_eq!(cfg.store.mode, ExecutionMode::Transactional);
        assert_eq!(cfg.store.backend, StoreBackend::Fauna { endpoint: DEFAULT_ENDPOINT.into(), secret: "fnSecret".into() });
        assert_eq!(cfg.upstream_timeout, Duration::from_secs(10));
        assert!(cfg.protect_resources);
        assert_eq!(cfg.identity.cognito.issuer(), "https://cognito-idp.us-east-1.amazonaws.com/us-east-1_TEST");
    }

    #[test]
    fn overrides() {
        let mut vars = base();
        vars.remove("FAUNA_SECRET");
        for (k, v) in [("STORE_BACKEND", "memory"), ("STORE_MODE", "direct"), ("CHANCHITO_HTTP_PORT", "9000"), ("PROTECT_RESOURCES", "off")] {
            vars.insert(k.into(), v.into());
        }
        let cfg = ApiConfig::from_map(&vars).unwrap();
        assert_eq!(cfg.store.backend, StoreBackend::Memory);
        assert_eq!(cfg.store.mode, ExecutionMode::Direct);
        assert_eq!(cfg.http_port, 9000);
        assert!(!cfg.protect_resources);
    }

    #[test]
    fn errors() {
        let mut vars = base();
        vars.remove("AWS_USER_POOL_ID");
        assert_eq!(ApiConfig::from_map(&vars).unwrap_err(), ConfigError::Missing("AWS_USER_POOL_ID"));

        let mut vars = base();
        vars.insert("CHANCHITO_HTTP_PORT".into(), "eighty".into());
        assert!(matches!(ApiConfig::from_map(&vars), Err(ConfigError::Invalid { key: "CHANCHITO_HTTP_PORT", .. })));

        let mut vars = base();
        vars.insert("STORE_BACKEND".into(), "dynamo".into());
        assert!(matches!(ApiConfig::from_map(&vars), Err(ConfigError::Invalid { key: "STORE_BACKEND", .. })));
    }

    #[test]
    fn secrets_are_not_logged() {
        let cfg = ApiConfig::from_map(&base()).unwrap();
        let shown = format!("{cfg:?}");
        assert!(!shown.contains("shh"));
        assert!(!shown.contains("fnSecret"));
    }
}
