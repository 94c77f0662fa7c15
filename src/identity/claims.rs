use serde::Serialize;
use serde_json::{Map, Value};

use super::AuthError;

/// Caller identity asserted by a verified token. Built per request, never stored.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Claims {
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// `access` or `id`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_use: Option<String>,
    /// The full verified payload.
    #[serde(skip)]
    pub attributes: Map<String, Value>,
}

impl Claims {
    /// `sub` is mandatory; everything else is optional.
    pub fn from_payload(payload: Map<String, Value>) -> Result<Self, AuthError> {
        let text = |k: &str| payload.get(k).and_then(Value::as_str).map(str::to_string);
        let sub = text("sub").ok_or_else(|| AuthError::InvalidClaims("missing string claim 'sub'".into()))?;
        // ID tokens carry `cognito:username`, access tokens `username`.
        let username = text("cognito:username").or_else(|| text("username"));
        let email = text("email");
        let token_use = text("token_use");
        Ok(Self { sub, username, email, token_use, attributes: payload })
    }

    /// Best human-readable name: username, then `name`, then email, then subject.
    pub fn display_name(&self) -> &str {
        self.username
            .as_deref()
            .or_else(|| self.attributes.get("name").and_then(Value::as_str))
            .or(self.email.as_deref())
            .unwrap_or(&self.sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(v: Value) -> Map<String, Value> {
        match v { Value::Object(m) => m, _ => unreachable!() }
    }

    #[test]
    fn id_token_claims() {
        let c = Claims::from_payload(payload(json!({
            "sub": "abc-123", "cognito:username": "papo", "email": "papo@chanchitofeliz.com", "token_use": "id",
        })))
        .unwrap();
        assert_eq!(c.display_name(), "papo");
        assert_eq!(c.token_use.as_deref(), Some("id"));
        assert_eq!(c.attributes["email"], "papo@chanchitofeliz.com");
    }

    #[test]
    fn display_name_falls_back_to_subject() {
        let c = Claims::from_payload(payload(json!({ "sub": "abc-123" }))).unwrap();
        assert_eq!(c.display_name(), "abc-123");
    }

    #[test]
    fn subject_is_required() {
        let err = Claims::from_payload(payload(json!({ "username": "papo" }))).unwrap_err();
        assert!(matches!(err, AuthError::InvalidClaims(_)));
    }
}
