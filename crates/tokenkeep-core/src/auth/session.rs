use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use reqwest::Client;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::coordinator::RefreshCoordinator;
use super::credentials::CredentialStore;
use super::events::{SessionEvent, SessionEvents};
use super::storage::{KeyringStorage, RefreshStorage};
use crate::api::error::{ApiError, Result};
use crate::api::{ApiClient, AuthApi};
use crate::models::{LoginCredentials, User};

/// Identity endpoint, relative to the API base URL
const PROFILE_PATH: &str = "/user/profile";

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Upper bound on a single token renewal call.
/// Every request queued behind a renewal waits at most this long.
const RENEWAL_TIMEOUT_SECS: u64 = 30;

/// The authenticated principal.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: User,
    pub authenticated_at: DateTime<Utc>,
}

impl Session {
    fn new(user: User) -> Self {
        Self {
            user,
            authenticated_at: Utc::now(),
        }
    }
}

pub struct SessionControllerBuilder {
    base_url: String,
    storage: Option<Arc<dyn RefreshStorage>>,
    request_timeout: Duration,
    renewal_timeout: Duration,
}

impl SessionControllerBuilder {
    fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            storage: None,
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            renewal_timeout: Duration::from_secs(RENEWAL_TIMEOUT_SECS),
        }
    }

    /// Where the refresh token is persisted. Defaults to the OS keychain.
    pub fn storage(mut self, storage: Arc<dyn RefreshStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn renewal_timeout(mut self, timeout: Duration) -> Self {
        self.renewal_timeout = timeout;
        self
    }

    /// Wire up the session. Must be called inside a Tokio runtime.
    pub fn build(self) -> Result<SessionController> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            ApiError::Validation("SessionController must be built inside a Tokio runtime".to_string())
        })?;

        let http = Client::builder().timeout(self.request_timeout).build()?;
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(KeyringStorage::new()));
        let store = Arc::new(CredentialStore::new(storage));
        let events = SessionEvents::new();
        let auth = AuthApi::new(http.clone(), self.base_url.clone());
        let coordinator = RefreshCoordinator::new(
            store.clone(),
            Arc::new(auth.clone()),
            events.clone(),
            self.renewal_timeout,
        );
        let client = ApiClient::new(http, self.base_url, store.clone(), coordinator.clone());

        let session = Arc::new(RwLock::new(None));
        let listener = runtime.spawn(watch_terminations(
            events.subscribe(),
            Arc::clone(&session),
            Arc::clone(&store),
        ));

        Ok(SessionController {
            auth,
            client,
            store,
            coordinator,
            events,
            session,
            listener,
        })
    }
}

/// Drops the identity whenever the coordinator tears the session down.
///
/// The coordinator only tears down the generation it renewed for, but a login
/// can still land between the teardown and this listener seeing the event.
/// That login holds fresh credentials and is left alone.
async fn watch_terminations(
    mut rx: tokio::sync::broadcast::Receiver<SessionEvent>,
    session: Arc<RwLock<Option<Session>>>,
    store: Arc<CredentialStore>,
) {
    loop {
        match rx.recv().await {
            Ok(SessionEvent::Terminated { reason }) => {
                info!(%reason, "Session terminated");
                if !store.has_access() {
                    *session.write() = None;
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "Session event listener lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Entry point for the hosting application: login, logout, startup restore
/// and access to the authenticated request pipeline.
pub struct SessionController {
    auth: AuthApi,
    client: ApiClient,
    store: Arc<CredentialStore>,
    coordinator: RefreshCoordinator,
    events: SessionEvents,
    session: Arc<RwLock<Option<Session>>>,
    listener: JoinHandle<()>,
}

impl SessionController {
    pub fn builder(base_url: impl Into<String>) -> SessionControllerBuilder {
        SessionControllerBuilder::new(base_url)
    }

    /// Pipeline for authenticated requests.
    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Authenticated while an identity is known and either an access token is
    /// held or a renewal is in flight.
    pub fn is_authenticated(&self) -> bool {
        self.session.read().is_some()
            && (self.store.has_access() || self.coordinator.is_refreshing())
    }

    pub fn current_user(&self) -> Option<User> {
        if !self.is_authenticated() {
            return None;
        }
        self.session.read().as_ref().map(|s| s.user.clone())
    }

    pub fn session(&self) -> Option<Session> {
        if !self.is_authenticated() {
            return None;
        }
        self.session.read().clone()
    }

    /// Log in with a username and password.
    ///
    /// On failure any existing session is left as it was.
    pub async fn login(&self, credentials: &LoginCredentials) -> Result<User> {
        validate(credentials)?;
        info!(username = %credentials.username, "Logging in");

        let response = self.auth.login(credentials).await.inspect_err(|e| {
            warn!(username = %credentials.username, error = %e, "Login failed");
        })?;
        let (user, tokens) = response.into_parts();

        self.store.begin_session(&tokens)?;
        *self.session.write() = Some(Session::new(user.clone()));
        self.events.emit(SessionEvent::LoggedIn(user.clone()));

        info!(username = %user.username, "Login successful");
        Ok(user)
    }

    /// End the session.
    ///
    /// The server-side invalidation is best effort; local credentials and
    /// identity are always cleared. Only a failure to erase the stored
    /// refresh token is reported.
    pub async fn logout(&self) -> Result<()> {
        let refresh = self.store.refresh().unwrap_or_else(|e| {
            warn!(error = %e, "Could not read stored refresh token");
            None
        });

        if let Some(ref token) = refresh {
            if let Err(e) = self.auth.logout(Some(token)).await {
                warn!(error = %e, "Server-side logout failed, clearing local session anyway");
            }
        }

        *self.session.write() = None;
        let cleared = self.store.end_session();
        self.events.emit(SessionEvent::LoggedOut);
        info!("Logged out");
        cleared
    }

    /// Run once at startup: turn a stored refresh token back into a session.
    ///
    /// Makes no network call when nothing is stored. Otherwise performs exactly
    /// one renewal and a profile fetch; any failure leaves the client logged
    /// out with nothing stored.
    pub async fn restore_session(&self) -> Option<User> {
        let generation = self.store.generation();
        match self.store.refresh() {
            Ok(Some(_)) => {}
            Ok(None) => {
                debug!("No stored refresh token, starting unauthenticated");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Could not read stored refresh token");
                return None;
            }
        }

        match self.try_restore().await {
            Ok(user) => {
                *self.session.write() = Some(Session::new(user.clone()));
                self.events.emit(SessionEvent::LoggedIn(user.clone()));
                info!(username = %user.username, "Session restored");
                Some(user)
            }
            Err(e) => {
                warn!(error = %e, "Session expired, could not restore");
                match self.store.clear_if_current(generation) {
                    Ok(true) => *self.session.write() = None,
                    Ok(false) => debug!("Session changed during restore, keeping it"),
                    Err(clear_err) => {
                        *self.session.write() = None;
                        error!(error = %clear_err, "Stored refresh token could not be removed");
                    }
                }
                None
            }
        }
    }

    async fn try_restore(&self) -> Result<User> {
        self.coordinator.renew().await?;
        self.fetch_profile().await
    }

    /// Re-fetch the identity record through the pipeline.
    pub async fn fetch_profile(&self) -> Result<User> {
        let user: User = self.client.get_json(PROFILE_PATH).await?;
        if let Some(ref mut session) = *self.session.write() {
            session.user = user.clone();
        }
        Ok(user)
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

fn validate(credentials: &LoginCredentials) -> Result<()> {
    if credentials.username.trim().is_empty() {
        return Err(ApiError::Validation("Username is required".to_string()));
    }
    if credentials.password.is_empty() {
        return Err(ApiError::Validation("Password is required".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::storage::MemoryStorage;

    #[test]
    fn test_validate_requires_both_fields() {
        assert!(matches!(
            validate(&LoginCredentials::new("", "pw")),
            Err(ApiError::Validation(_))
        ));
        assert!(matches!(
            validate(&LoginCredentials::new("   ", "pw")),
            Err(ApiError::Validation(_))
        ));
        assert!(matches!(
            validate(&LoginCredentials::new("alice", "")),
            Err(ApiError::Validation(_))
        ));
        assert!(validate(&LoginCredentials::new("alice", "pw")).is_ok());
    }

    #[test]
    fn test_build_outside_runtime_fails() {
        let result = SessionController::builder("http://localhost:5000/api")
            .storage(Arc::new(MemoryStorage::new()))
            .build();
        assert!(matches!(result, Err(ApiError::Validation(_))));
    }

    #[tokio::test]
    async fn test_fresh_controller_is_unauthenticated() {
        let controller = SessionController::builder("http://localhost:5000/api")
            .storage(Arc::new(MemoryStorage::new()))
            .build()
            .unwrap();

        assert!(!controller.is_authenticated());
        assert!(controller.current_user().is_none());
        // Nothing stored, so no network call is attempted
        assert!(controller.restore_session().await.is_none());
    }
}
