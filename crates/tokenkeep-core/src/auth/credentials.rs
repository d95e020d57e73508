use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::storage::RefreshStorage;
use crate::api::error::Result;
use crate::models::TokenPair;

/// Holder of the session's two credentials.
///
/// The access token lives only in this process. The refresh token goes to the
/// configured [`RefreshStorage`]. Token values are never logged.
///
/// Every login and logout starts a new generation. A renewal remembers the
/// generation it started in and may only commit or clear credentials while
/// that generation is still current.
pub struct CredentialStore {
    access: Mutex<Option<String>>,
    durable: Arc<dyn RefreshStorage>,
    /// Held across durable writes and generation changes, never across an await.
    commit: Mutex<()>,
    generation: AtomicU64,
}

impl CredentialStore {
    pub fn new(durable: Arc<dyn RefreshStorage>) -> Self {
        Self {
            access: Mutex::new(None),
            durable,
            commit: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn access(&self) -> Option<String> {
        self.access.lock().clone()
    }

    pub fn has_access(&self) -> bool {
        self.access.lock().is_some()
    }

    pub fn set_access(&self, token: impl Into<String>) {
        *self.access.lock() = Some(token.into());
    }

    pub fn clear_access(&self) {
        *self.access.lock() = None;
    }

    pub fn refresh(&self) -> Result<Option<String>> {
        self.durable.load()
    }

    pub fn set_refresh(&self, token: &str) -> Result<()> {
        let _commit = self.commit.lock();
        self.durable.save(token)
    }

    pub fn clear_refresh(&self) -> Result<()> {
        let _commit = self.commit.lock();
        self.durable.clear()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Replace both credentials as one step.
    ///
    /// The durable write happens first; if it fails the previous pair is left
    /// in place and the error is returned.
    pub fn rotate(&self, tokens: &TokenPair) -> Result<()> {
        let _commit = self.commit.lock();
        self.write_pair(tokens)
    }

    /// Drop both credentials. The in-memory token is cleared even if the
    /// durable backend fails.
    pub fn clear_all(&self) -> Result<()> {
        let _commit = self.commit.lock();
        self.wipe()
    }

    /// Commit a freshly issued pair as a new generation.
    pub fn begin_session(&self, tokens: &TokenPair) -> Result<()> {
        let _commit = self.commit.lock();
        self.write_pair(tokens)?;
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Move to a new generation and drop both credentials.
    pub fn end_session(&self) -> Result<()> {
        let _commit = self.commit.lock();
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.wipe()
    }

    /// `rotate`, but only while `generation` is current. Returns `false` and
    /// leaves everything untouched once a login or logout has moved on.
    pub fn rotate_if_current(&self, generation: u64, tokens: &TokenPair) -> Result<bool> {
        let _commit = self.commit.lock();
        if self.generation() != generation {
            return Ok(false);
        }
        self.write_pair(tokens).map(|()| true)
    }

    /// `clear_all`, but only while `generation` is current.
    pub fn clear_if_current(&self, generation: u64) -> Result<bool> {
        let _commit = self.commit.lock();
        if self.generation() != generation {
            return Ok(false);
        }
        self.wipe().map(|()| true)
    }

    fn write_pair(&self, tokens: &TokenPair) -> Result<()> {
        self.durable.save(&tokens.refresh_token)?;
        *self.access.lock() = Some(tokens.access_token.clone());
        debug!("Credentials rotated");
        Ok(())
    }

    fn wipe(&self) -> Result<()> {
        self.clear_access();
        self.durable.clear().inspect_err(|e| {
            warn!(error = %e, "Failed to clear stored refresh token");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::ApiError;
    use crate::auth::storage::MemoryStorage;

    struct BrokenStorage;

    impl RefreshStorage for BrokenStorage {
        fn load(&self) -> Result<Option<String>> {
            Ok(Some("rt-old".to_string()))
        }
        fn save(&self, _token: &str) -> Result<()> {
            Err(ApiError::Storage("disk full".into()))
        }
        fn clear(&self) -> Result<()> {
            Err(ApiError::Storage("read-only".into()))
        }
    }

    #[test]
    fn test_access_is_memory_only() {
        let durable = Arc::new(MemoryStorage::new());
        let store = CredentialStore::new(durable.clone());

        store.set_access("at1");
        assert_eq!(store.access().as_deref(), Some("at1"));
        assert_eq!(durable.load().unwrap(), None);

        store.clear_access();
        assert!(!store.has_access());
    }

    #[test]
    fn test_rotate_replaces_both() {
        let durable = Arc::new(MemoryStorage::with_token("rt1"));
        let store = CredentialStore::new(durable.clone());
        store.set_access("at1");

        store.rotate(&TokenPair::new("at2", "rt2")).unwrap();

        assert_eq!(store.access().as_deref(), Some("at2"));
        assert_eq!(store.refresh().unwrap().as_deref(), Some("rt2"));
    }

    #[test]
    fn test_failed_rotation_keeps_previous_pair() {
        let store = CredentialStore::new(Arc::new(BrokenStorage));
        store.set_access("at1");

        assert!(store.rotate(&TokenPair::new("at2", "rt2")).is_err());
        assert_eq!(store.access().as_deref(), Some("at1"));
    }

    #[test]
    fn test_clear_all_drops_access_even_on_storage_error() {
        let store = CredentialStore::new(Arc::new(BrokenStorage));
        store.set_access("at1");

        assert!(store.clear_all().is_err());
        assert!(!store.has_access());
    }

    #[test]
    fn test_clear_visible_to_other_holders() {
        let store = Arc::new(CredentialStore::new(Arc::new(MemoryStorage::new())));
        let other = Arc::clone(&store);

        store.rotate(&TokenPair::new("at1", "rt1")).unwrap();
        store.clear_all().unwrap();

        assert_eq!(other.access(), None);
        assert_eq!(other.refresh().unwrap(), None);
    }

    #[test]
    fn test_stale_generation_cannot_commit() {
        let durable = Arc::new(MemoryStorage::with_token("rt1"));
        let store = CredentialStore::new(durable.clone());
        let renewal_started = store.generation();

        store.end_session().unwrap();

        assert!(!store
            .rotate_if_current(renewal_started, &TokenPair::new("at2", "rt2"))
            .unwrap());
        assert_eq!(store.access(), None);
        assert_eq!(durable.load().unwrap(), None);
    }

    #[test]
    fn test_stale_generation_cannot_clear_new_login() {
        let durable = Arc::new(MemoryStorage::with_token("rt1"));
        let store = CredentialStore::new(durable.clone());
        let renewal_started = store.generation();

        store.begin_session(&TokenPair::new("atB", "rtB")).unwrap();

        assert!(!store.clear_if_current(renewal_started).unwrap());
        assert_eq!(store.access().as_deref(), Some("atB"));
        assert_eq!(durable.load().unwrap().as_deref(), Some("rtB"));

        let current = store.generation();
        assert!(store.clear_if_current(current).unwrap());
        assert_eq!(durable.load().unwrap(), None);
    }

    #[test]
    fn test_failed_login_commit_keeps_generation() {
        let store = CredentialStore::new(Arc::new(BrokenStorage));
        let before = store.generation();

        assert!(store.begin_session(&TokenPair::new("at1", "rt1")).is_err());
        assert_eq!(store.generation(), before);
    }
}
