//! Calls to the authentication service.
//!
//! These go straight to the HTTP client and never through the request
//! pipeline, so a failed renewal can't trigger another renewal.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::{debug, warn};

use super::error::{ApiError, Result};
use crate::auth::coordinator::TokenRenewer;
use crate::models::{AuthResponse, LoginCredentials, TokenPair};

#[derive(Serialize)]
struct RefreshTokenBody<'a> {
    #[serde(rename = "refreshToken")]
    refresh_token: &'a str,
}

/// Typed client for `/auth/*`.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct AuthApi {
    client: Client,
    base_url: String,
}

impl AuthApi {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `POST /auth/login`. A 400 or 401 means the credentials were rejected.
    pub async fn login(&self, credentials: &LoginCredentials) -> Result<AuthResponse> {
        let response = self
            .client
            .post(self.url("/auth/login"))
            .json(credentials)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            debug!(%status, "Login rejected");
            return Err(ApiError::Authentication(login_rejection_message(&body)));
        }

        let response = check_response(response).await?;
        Ok(response.json().await?)
    }

    /// `POST /auth/refresh`. A 4xx means the refresh token is no longer valid.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let response = self
            .client
            .post(self.url("/auth/refresh"))
            .json(&RefreshTokenBody { refresh_token })
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
            debug!(%status, "Refresh token rejected");
            return Err(ApiError::SessionExpired(format!(
                "refresh token rejected ({})",
                status
            )));
        }

        let response = check_response(response).await?;
        Ok(response.json().await?)
    }

    /// `POST /auth/logout`. The response body is ignored.
    pub async fn logout(&self, refresh_token: Option<&str>) -> Result<()> {
        let response = self
            .client
            .post(self.url("/auth/logout"))
            .json(&serde_json::json!({ "refreshToken": refresh_token }))
            .send()
            .await?;

        check_response(response).await?;
        Ok(())
    }
}

#[async_trait]
impl TokenRenewer for AuthApi {
    async fn renew(&self, refresh_token: &str) -> Result<TokenPair> {
        self.refresh(refresh_token).await
    }
}

/// Check if response is successful, returning an error with body if not.
pub(crate) async fn check_response(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        Ok(response)
    } else {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        warn!(%status, "Request failed");
        Err(ApiError::from_status(status, &body))
    }
}

/// Pull a human-readable message out of a login rejection body.
fn login_rejection_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| "Invalid username or password".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let api = AuthApi::new(Client::new(), "http://localhost:5000/api/");
        assert_eq!(api.url("/auth/login"), "http://localhost:5000/api/auth/login");
    }

    #[test]
    fn test_login_rejection_message() {
        assert_eq!(
            login_rejection_message(r#"{"message":"Account locked","status":401}"#),
            "Account locked"
        );
        assert_eq!(login_rejection_message("Unauthorized"), "Invalid username or password");
        assert_eq!(login_rejection_message(r#"{"status":401}"#), "Invalid username or password");
    }

    #[test]
    fn test_refresh_body_shape() {
        let body = serde_json::to_value(RefreshTokenBody { refresh_token: "rt1" }).unwrap();
        assert_eq!(body, serde_json::json!({"refreshToken": "rt1"}));
    }
}
