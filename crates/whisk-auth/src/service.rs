//! Token renewal over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::COOKIE;
use whisk_settings::TokenServiceSettings;

use crate::errors::AuthError;
use crate::types::{RenewResponse, TokenGrant, WsToken};

/// Issues websocket tokens for the current HTTP session.
#[async_trait]
pub trait TokenService: Send + Sync {
    /// Request a fresh token.
    async fn renew(&self) -> Result<TokenGrant, AuthError>;
}

/// [`TokenService`] backed by the router's renewal endpoint.
///
/// The request carries the HTTP session implicitly through the `Cookie`
/// header; the server derives the user from it.
#[derive(Clone, Debug)]
pub struct HttpTokenService {
    client: reqwest::Client,
    url: String,
    cookie: Option<String>,
}

impl HttpTokenService {
    /// Build a service from settings.
    pub fn new(settings: &TokenServiceSettings) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            url: settings.renew_url(),
            cookie: None,
        })
    }

    /// Attach the hosting application's session cookie to renewal requests.
    #[must_use]
    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }

    /// The renewal URL this service calls.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TokenService for HttpTokenService {
    #[tracing::instrument(skip_all, fields(url = %self.url))]
    async fn renew(&self) -> Result<TokenGrant, AuthError> {
        let mut request = self.client.get(&self.url);
        if let Some(cookie) = &self.cookie {
            request = request.header(COOKIE, cookie);
        }
        let resp = request.send().await?;

        let status = resp.status().as_u16();
        if status != 200 {
            let text = resp.text().await.unwrap_or_default();
            return Err(AuthError::Renewal {
                status,
                message: text,
            });
        }

        let body = resp.text().await?;
        let data: RenewResponse = serde_json::from_str(&body)?;
        let token = data
            .ws_token
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)?;

        tracing::debug!(user_id = ?data.user_id, "ws token renewed");
        Ok(TokenGrant {
            token: WsToken::new(token),
            identity: data.user_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Identity;
    use assert_matches::assert_matches;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RENEW_PATH: &str = "/rapt-whisk-router/api/renew_ws_session";

    fn service_for(server: &MockServer) -> HttpTokenService {
        let settings = TokenServiceSettings {
            base_url: server.uri(),
            ..TokenServiceSettings::default()
        };
        HttpTokenService::new(&settings).unwrap()
    }

    #[tokio::test]
    async fn renew_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(RENEW_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ws_token": "T1",
                "user_id": "U1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let grant = service_for(&server).renew().await.unwrap();
        assert_eq!(grant.token.as_str(), "T1");
        assert_eq!(grant.identity, Some(Identity::from("U1")));
    }

    #[tokio::test]
    async fn renew_numeric_user_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(RENEW_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ws_token": "T7",
                "user_id": 7
            })))
            .mount(&server)
            .await;

        let grant = service_for(&server).renew().await.unwrap();
        assert_eq!(grant.identity, Some(Identity::from("7")));
    }

    #[tokio::test]
    async fn renew_sends_cookie() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(RENEW_PATH))
            .and(header("cookie", "sid=abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ws_token": "T1",
                "user_id": "U1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let svc = service_for(&server).with_cookie("sid=abc");
        assert!(svc.renew().await.is_ok());
    }

    #[tokio::test]
    async fn renew_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(RENEW_PATH))
            .respond_with(ResponseTemplate::new(401).set_body_string("login required"))
            .mount(&server)
            .await;

        let err = service_for(&server).renew().await.unwrap_err();
        assert_matches!(
            err,
            AuthError::Renewal { status: 401, ref message } if message == "login required"
        );
    }

    #[tokio::test]
    async fn renew_without_token_is_missing_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(RENEW_PATH))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "user_id": "U1" })),
            )
            .mount(&server)
            .await;

        let err = service_for(&server).renew().await.unwrap_err();
        assert_matches!(err, AuthError::MissingToken);
    }

    #[tokio::test]
    async fn renew_empty_token_is_missing_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(RENEW_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ws_token": "",
                "user_id": "U1"
            })))
            .mount(&server)
            .await;

        let err = service_for(&server).renew().await.unwrap_err();
        assert_matches!(err, AuthError::MissingToken);
    }

    #[tokio::test]
    async fn renew_invalid_body_is_json_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(RENEW_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = service_for(&server).renew().await.unwrap_err();
        assert_matches!(err, AuthError::Json(_));
    }

    #[test]
    fn url_from_settings() {
        let settings = TokenServiceSettings {
            base_url: "http://example.test:3000".into(),
            ..TokenServiceSettings::default()
        };
        let svc = HttpTokenService::new(&settings).unwrap();
        assert_eq!(svc.url(), format!("http://example.test:3000{RENEW_PATH}"));
    }
}
