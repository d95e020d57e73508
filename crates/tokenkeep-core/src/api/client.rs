//! Request pipeline for authenticated API calls.
//!
//! Every request carries the current access token. A 401 sends the request
//! through the refresh coordinator once and replays it with the renewed
//! token; a second 401 is handed back to the caller as-is.

use std::sync::Arc;

use reqwest::{Client, Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::auth::check_response;
use super::error::{ApiError, Result};
use crate::auth::{CredentialStore, RefreshCoordinator};

/// A replayable request description.
///
/// Kept separate from `reqwest::Request` so the exact same call can be built
/// again after a renewal.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Authenticated API client.
/// Clone is cheap - clones share the connection pool, credentials and
/// refresh coordinator.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    store: Arc<CredentialStore>,
    coordinator: RefreshCoordinator,
}

impl ApiClient {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        store: Arc<CredentialStore>,
        coordinator: RefreshCoordinator,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            store,
            coordinator,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    async fn dispatch(&self, request: &ApiRequest, token: Option<&str>) -> Result<Response> {
        let mut builder = self
            .client
            .request(request.method.clone(), self.url(&request.path));
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }
        Ok(builder.send().await?)
    }

    /// Send a request, renewing the access token and replaying once on 401.
    ///
    /// Any response other than the first 401 is returned unchanged, including
    /// a 401 on the replay. Renewal failures are returned as errors.
    pub async fn send(&self, request: &ApiRequest) -> Result<Response> {
        let token = self.store.access();
        let response = self.dispatch(request, token.as_deref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!(method = %request.method, path = %request.path, "Access token rejected, renewing");
        let fresh = self.coordinator.replacement_for(token.as_deref()).await?;

        // Single replay; its outcome goes back to the caller whatever it is.
        let response = self.dispatch(request, Some(&fresh)).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!(method = %request.method, path = %request.path, "Request rejected again after renewal");
        }
        Ok(response)
    }

    /// Send a request and parse a successful JSON response.
    pub async fn request_json<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T> {
        let response = self.send(request).await?;
        let response = check_response(response).await?;
        Ok(response.json().await?)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request_json(&ApiRequest::get(path)).await
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let body = serde_json::to_value(body)
            .map_err(|e| ApiError::Validation(format!("Failed to encode request body: {}", e)))?;
        self.request_json(&ApiRequest::post(path).json(body)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{MemoryStorage, SessionEvents};
    use crate::api::AuthApi;
    use std::time::Duration;

    fn client(base_url: &str) -> ApiClient {
        let store = Arc::new(CredentialStore::new(Arc::new(MemoryStorage::new())));
        let http = Client::new();
        let coordinator = RefreshCoordinator::new(
            store.clone(),
            Arc::new(AuthApi::new(http.clone(), base_url)),
            SessionEvents::new(),
            Duration::from_secs(1),
        );
        ApiClient::new(http, base_url, store, coordinator)
    }

    #[test]
    fn test_url_joining() {
        let api = client("http://localhost:5000/api/");
        assert_eq!(api.base_url(), "http://localhost:5000/api");
        assert_eq!(api.url("/user/profile"), "http://localhost:5000/api/user/profile");
        assert_eq!(api.url("user/profile"), "http://localhost:5000/api/user/profile");
    }

    #[test]
    fn test_request_builder() {
        let request = ApiRequest::post("/notes")
            .query("draft", "true")
            .json(serde_json::json!({"title": "hello"}));

        assert_eq!(request.method(), &Method::POST);
        assert_eq!(request.path(), "/notes");
        assert_eq!(request.query, vec![("draft".to_string(), "true".to_string())]);
        assert_eq!(request.clone(), request);
    }
}
