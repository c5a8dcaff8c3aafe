//! Email/password exchange against the identity REST API.

use crate::config::CredentialBundle;
use crate::error::AuthError;
use crate::session::Session;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    SignIn,
    SignUp,
}

impl AuthMode {
    fn endpoint(self) -> &'static str {
        match self {
            Self::SignIn => "accounts:signInWithPassword",
            Self::SignUp => "accounts:signUp",
        }
    }
}

#[derive(Clone)]
pub struct AuthClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct IdentityResponse {
    #[serde(rename = "localId")]
    local_id: Option<String>,
    error: Option<IdentityError>,
}

#[derive(Debug, Deserialize)]
struct IdentityError {
    message: Option<String>,
}

impl AuthClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn from_bundle(bundle: &CredentialBundle) -> Self {
        Self::new(bundle.identity_url.clone(), bundle.api_key.clone())
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        self.authenticate(AuthMode::SignIn, email, password).await
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        self.authenticate(AuthMode::SignUp, email, password).await
    }

    pub async fn authenticate(
        &self,
        mode: AuthMode,
        email: &str,
        password: &str,
    ) -> Result<Session, AuthError> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(AuthError::EmptyCredentials);
        }
        let url = format!("{}/{}", self.base_url, mode.endpoint());
        let payload = serde_json::json!({
            "email": email,
            "password": password,
            "returnSecureToken": true,
        });
        let resp = self
            .client
            .post(url)
            .query(&[("key", self.api_key.as_str())])
            .json(&payload)
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        // Error bodies from the identity API are JSON too; fall back to raw text.
        let parsed: Option<IdentityResponse> = serde_json::from_str(&body).ok();

        if let Some(local_id) = parsed.as_ref().and_then(|r| r.local_id.as_deref()) {
            return Session::new(local_id).ok_or(AuthError::MissingLocalId);
        }
        let message = parsed
            .and_then(|r| r.error)
            .and_then(|e| e.message)
            .unwrap_or_else(|| {
                if status.is_success() {
                    String::new()
                } else {
                    format!("{status}: {}", body.trim())
                }
            });
        if message.is_empty() {
            return Err(AuthError::MissingLocalId);
        }
        Err(AuthError::Rejected(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn sign_in_returns_local_id_as_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/accounts:signInWithPassword"))
            .and(query_param("key", "api-key"))
            .and(body_json(serde_json::json!({
                "email": "ops@example.com",
                "password": "hunter22",
                "returnSecureToken": true,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "localId": "uid-42",
                "idToken": "token",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = AuthClient::new(server.uri(), "api-key");
        let session = client.sign_in(" ops@example.com ", "hunter22").await.unwrap();
        assert_eq!(session.id(), "uid-42");
    }

    #[tokio::test]
    async fn sign_up_uses_its_own_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/accounts:signUp"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"localId": "new"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = AuthClient::new(server.uri(), "api-key");
        assert_eq!(client.sign_up("a@b.c", "pw").await.unwrap().id(), "new");
    }

    #[tokio::test]
    async fn rejected_credentials_surface_identity_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {"code": 400, "message": "INVALID_PASSWORD"}
            })))
            .mount(&server)
            .await;

        let client = AuthClient::new(server.uri(), "api-key");
        let err = client.sign_in("a@b.c", "wrong").await.unwrap_err();
        assert!(matches!(err, AuthError::Rejected(ref m) if m == "INVALID_PASSWORD"));
    }

    #[tokio::test]
    async fn success_without_local_id_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let client = AuthClient::new(server.uri(), "api-key");
        let err = client.sign_in("a@b.c", "pw").await.unwrap_err();
        assert!(matches!(err, AuthError::MissingLocalId));
    }

    #[tokio::test]
    async fn empty_credentials_are_rejected_locally() {
        let client = AuthClient::new("http://127.0.0.1:9", "api-key");
        let err = client.sign_in("  ", "pw").await.unwrap_err();
        assert!(matches!(err, AuthError::EmptyCredentials));
    }
}
