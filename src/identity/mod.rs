//! Identity: bearer-token verification against the Cognito user pool and the
//! authorization-code exchange used by `/login/token`.
//! Keep the public surface thin and split implementation across sub-modules.

mod claims;
mod gate;
mod oauth;
mod verifier;

use thiserror::Error;

pub use claims::Claims;
pub use gate::{bearer_token, require_bearer, AccessGate};
pub use oauth::TokenExchange;
pub use verifier::{CognitoSettings, CognitoVerifier, Jwk, Jwks, TokenVerifier};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingCredential,
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("token expired")]
    Expired,
    #[error("invalid token signature")]
    InvalidSignature,
    #[error("token issued by a different user pool")]
    WrongIssuer,
    #[error("token issued for a different client")]
    WrongClient,
    #[error("unknown signing key '{0}'")]
    UnknownKey(String),
    #[error("identity provider rejected the request: {0}")]
    Rejected(String),
    #[error("claims do not match the expected shape: {0}")]
    InvalidClaims(String),
    #[error("identity provider unavailable: {0}")]
    Provider(String),
    #[error("identity provider not configured: {0}")]
    NotConfigured(String),
}
