use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use tracing::debug;

use super::context::{CachedToken, OidcConfig};
use crate::error::CredentialError;

/// Exchanges client credentials for an access token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self, oidc: &OidcConfig) -> Result<CachedToken, CredentialError>;
}

#[derive(Deserialize)]
struct DiscoveryDocument {
    token_endpoint: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// OIDC client-credentials flow using the issuer's discovery document.
#[derive(Clone)]
pub struct OidcTokenClient {
    http: reqwest::Client,
}

impl OidcTokenClient {
    pub fn new(timeout: std::time::Duration) -> Result<Self, CredentialError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn token_endpoint(&self, issuer_url: &str) -> Result<String, CredentialError> {
        let url = format!(
            "{}/.well-known/openid-configuration",
            issuer_url.trim_end_matches('/')
        );
        let resp = self.http.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(CredentialError::Token(format!(
                "discovery at {url} answered {}",
                resp.status()
            )));
        }
        let doc: DiscoveryDocument = resp.json().await?;
        Ok(doc.token_endpoint)
    }
}

#[async_trait]
impl TokenSource for OidcTokenClient {
    async fn fetch_token(&self, oidc: &OidcConfig) -> Result<CachedToken, CredentialError> {
        let endpoint = self.token_endpoint(&oidc.issuer_url).await?;
        let scope = if oidc.offline_access {
            "openid offline_access"
        } else {
            "openid"
        };
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", oidc.client_id.as_str()),
            ("client_secret", oidc.client_secret.as_str()),
            ("audience", oidc.audience.as_str()),
            ("scope", scope),
        ];

        let resp = self.http.post(&endpoint).form(&form[..]).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CredentialError::Token(format!(
                "token endpoint answered {status}: {body}"
            )));
        }
        let token: TokenResponse = resp.json().await?;
        debug!(client_id = %oidc.client_id, expires_in = ?token.expires_in, "obtained access token");

        Ok(CachedToken {
            access_token: token.access_token,
            expiry: token.expires_in.and_then(|secs| expiry_after(Utc::now(), secs)),
        })
    }
}

/// `None` when `secs` does not fit the calendar; the token is then treated
/// like one without a stated lifetime.
fn expiry_after(now: DateTime<Utc>, secs: i64) -> Option<DateTime<Utc>> {
    TimeDelta::try_seconds(secs).and_then(|d| now.checked_add_signed(d))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_string_contains, method, path},
    };

    fn oidc(issuer: &str) -> OidcConfig {
        OidcConfig {
            audience: "observatorium".into(),
            issuer_url: issuer.into(),
            client_id: "reloader".into(),
            client_secret: "s3cret".into(),
            offline_access: false,
            token: None,
        }
    }

    async fn mount_discovery(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "issuer": server.uri(),
                "token_endpoint": format!("{}/token", server.uri()),
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn client_credentials_exchange() {
        let server = MockServer::start().await;
        mount_discovery(&server).await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_id=reloader"))
            .and(body_string_contains("audience=observatorium"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "abc",
                "token_type": "Bearer",
                "expires_in": 300,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = OidcTokenClient::new(std::time::Duration::from_secs(5)).unwrap();
        let token = client.fetch_token(&oidc(&server.uri())).await.unwrap();
        assert_eq!(token.access_token, "abc");
        assert!(token.is_fresh_at(Utc::now()));
    }

    #[tokio::test]
    async fn out_of_range_lifetime_leaves_expiry_unset() {
        let server = MockServer::start().await;
        mount_discovery(&server).await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "abc",
                "expires_in": 100_000_000_000_000_i64,
            })))
            .mount(&server)
            .await;

        let client = OidcTokenClient::new(std::time::Duration::from_secs(5)).unwrap();
        let token = client.fetch_token(&oidc(&server.uri())).await.unwrap();
        assert_eq!(token.access_token, "abc");
        assert_eq!(token.expiry, None);
        assert!(token.is_fresh_at(Utc::now()));
    }

    #[test]
    fn expiry_is_checked() {
        let now = Utc::now();
        assert_eq!(expiry_after(now, 60), Some(now + TimeDelta::seconds(60)));
        assert_eq!(expiry_after(now, i64::MAX), None);
        assert_eq!(expiry_after(now, i64::MIN), None);
    }

    #[tokio::test]
    async fn rejected_credentials_are_a_token_error() {
        let server = MockServer::start().await;
        mount_discovery(&server).await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid_client"))
            .mount(&server)
            .await;

        let client = OidcTokenClient::new(std::time::Duration::from_secs(5)).unwrap();
        let err = client.fetch_token(&oidc(&server.uri())).await.unwrap_err();
        match err {
            CredentialError::Token(msg) => assert!(msg.contains("invalid_client"), "{msg}"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
