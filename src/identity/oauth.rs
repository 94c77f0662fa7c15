use std::time::Duration;

use reqwest::header::ACCEPT;
use serde_json::Value;
use tracing::{info, warn};
use url::Url;

use super::AuthError;

/// Authorization-code exchange against the user pool's hosted domain.
#[derive(Clone)]
pub struct TokenExchange {
    token_url: Url,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    http: reqwest::Client,
}

impl TokenExchange {
    /// `domain` is either a bare host (`auth.example.com`), which gets
    /// `https://<domain>/oauth2/token`, or a full base URL.
    pub fn for_domain(
        domain: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AuthError> {
        let base = if domain.contains("://") { domain.trim_end_matches('/').to_string() } else { format!("https://{domain}") };
        let token_url = Url::parse(&format!("{base}/oauth2/token"))
            .map_err(|e| AuthError::NotConfigured(format!("cognito domain '{domain}': {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Provider(e.to_string()))?;
        Ok(Self {
            token_url,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            http,
        })
    }

    pub fn token_url(&self) -> &Url { &self.token_url }

    /// Returns the provider's JSON verbatim.
    pub async fn exchange(&self, code: &str) -> Result<Value, AuthError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];
        let resp = self
            .http
            .post(self.token_url.clone())
            .header(ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::Provider(format!("token endpoint: {e}")))?;
        let status = resp.status();
        if status.is_success() {
            let body: Value = resp
                .json()
                .await
                .map_err(|e| AuthError::Provider(format!("token endpoint: invalid JSON: {e}")))?;
            info!(target: "chanchito::identity", "authorization code exchanged");
            return Ok(body);
        }
        // Error bodies are best-effort; only the `error` field is read.
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        let reason = body
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {status}"));
        warn!(target: "chanchito::identity", status = status.as_u16(), %reason, "token exchange refused");
        if status.is_client_error() {
            Err(AuthError::Rejected(reason))
        } else {
            Err(AuthError::Provider(reason))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_url_from_domain() {
        let t = TokenExchange::for_domain("auth.chanchito.net", "id", "secret", "https://api.chanchito.net/login/token", Duration::from_secs(1)).unwrap();
        assert_eq!(t.token_url().as_str(), "https://auth.chanchito.net/oauth2/token");
        let t = TokenExchange::for_domain("http://127.0.0.1:9999/", "id", "secret", "r", Duration::from_secs(1)).unwrap();
        assert_eq!(t.token_url().as_str(), "http://127.0.0.1:9999/oauth2/token");
    }

    #[test]
    fn rejects_unparseable_domain() {
        let err = TokenExchange::for_domain("bad domain", "id", "s", "r", Duration::from_secs(1)).err().unwrap();
        assert!(matches!(err, AuthError::NotConfigured(_)));
    }
}
