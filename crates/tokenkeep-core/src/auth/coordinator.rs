//! Single-flight token renewal.
//!
//! Every caller that needs a new access token joins a queue. The first
//! arrival while `Idle` moves the state to `Refreshing` and spawns the one
//! renewal call; later arrivals only queue. When that call finishes, the
//! credentials are committed (or cleared) and then the whole queue is released
//! with the same outcome in a single step, so anyone who sees `Idle` also sees
//! the outcome in the store.
//!
//! A renewal belongs to the store generation it started in. If a login or
//! logout happens before it finishes, its result is discarded: nothing is
//! committed or cleared, and the queued callers get `SessionExpired`.

use std::mem;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use super::credentials::CredentialStore;
use super::events::{SessionEvent, SessionEvents};
use crate::api::error::{ApiError, Result};
use crate::models::TokenPair;

/// Exchanges a refresh token for a new credential pair.
#[async_trait]
pub trait TokenRenewer: Send + Sync {
    async fn renew(&self, refresh_token: &str) -> Result<TokenPair>;
}

type Waiter = oneshot::Sender<Result<String>>;

enum RefreshState {
    Idle,
    Refreshing { queue: Vec<Waiter> },
}

impl RefreshState {
    /// Queue a waiter. Returns `true` when this arrival started a renewal.
    fn enqueue(&mut self, waiter: Waiter) -> bool {
        match self {
            RefreshState::Refreshing { queue } => {
                queue.push(waiter);
                false
            }
            RefreshState::Idle => {
                *self = RefreshState::Refreshing {
                    queue: vec![waiter],
                };
                true
            }
        }
    }

    /// Back to `Idle`, handing over everyone who was waiting.
    fn finish(&mut self) -> Vec<Waiter> {
        match mem::replace(self, RefreshState::Idle) {
            RefreshState::Refreshing { queue } => queue,
            RefreshState::Idle => Vec::new(),
        }
    }

    fn is_refreshing(&self) -> bool {
        matches!(self, RefreshState::Refreshing { .. })
    }
}

struct Inner {
    state: Mutex<RefreshState>,
    store: Arc<CredentialStore>,
    renewer: Arc<dyn TokenRenewer>,
    events: SessionEvents,
    timeout: Duration,
}

/// Serializes token renewals. Cheap to clone; clones share one state machine.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<CredentialStore>,
        renewer: Arc<dyn TokenRenewer>,
        events: SessionEvents,
        timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(RefreshState::Idle),
                store,
                renewer,
                events,
                timeout,
            }),
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.state.lock().is_refreshing()
    }

    /// Wait for a renewed access token, starting a renewal if none is running.
    pub async fn renew(&self) -> Result<String> {
        let rx = {
            let mut state = self.inner.state.lock();
            self.join(&mut state)
        };
        Self::wait(rx).await
    }

    /// Token to replay a request with after it was rejected using `stale`.
    ///
    /// If a finished renewal already replaced `stale`, the current token is
    /// returned and no new renewal is started.
    pub async fn replacement_for(&self, stale: Option<&str>) -> Result<String> {
        let rx = {
            let mut state = self.inner.state.lock();
            if !state.is_refreshing() {
                if let Some(current) = self.inner.store.access() {
                    if stale != Some(current.as_str()) {
                        debug!("Access token already replaced, reusing it");
                        return Ok(current);
                    }
                }
            }
            self.join(&mut state)
        };
        Self::wait(rx).await
    }

    fn join(&self, state: &mut RefreshState) -> oneshot::Receiver<Result<String>> {
        let (tx, rx) = oneshot::channel();
        if state.enqueue(tx) {
            let generation = self.inner.store.generation();
            debug!(generation, "Starting token renewal");
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.run_renewal(generation).await });
        } else {
            debug!("Renewal in flight, queued behind it");
        }
        rx
    }

    async fn wait(rx: oneshot::Receiver<Result<String>>) -> Result<String> {
        rx.await
            .map_err(|_| ApiError::SessionExpired("Token renewal was abandoned".to_string()))?
    }
}

/// How a renewal cycle ended, decided before the queue is released.
enum Settled {
    Renewed(String),
    Failed { err: ApiError, torn_down: bool },
}

impl Inner {
    async fn run_renewal(self: Arc<Self>, generation: u64) {
        let outcome = AssertUnwindSafe(self.renew_once())
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(ApiError::SessionExpired("Token renewal panicked".to_string())));

        // Durable I/O happens before the state lock is taken; newcomers keep
        // queueing until the queue is released below.
        let settled = match outcome {
            Ok(tokens) => match self.store.rotate_if_current(generation, &tokens) {
                Ok(true) => Settled::Renewed(tokens.access_token),
                Ok(false) => self.superseded(),
                Err(err) => self.tear_down(generation, err),
            },
            Err(err) => self.tear_down(generation, err),
        };

        let waiters = self.state.lock().finish();

        match settled {
            Settled::Renewed(access_token) => {
                info!(waiters = waiters.len(), "Access token renewed");
                for waiter in waiters {
                    let _ = waiter.send(Ok(access_token.clone()));
                }
                self.events.emit(SessionEvent::Refreshed);
            }
            Settled::Failed { err, torn_down } => {
                for waiter in waiters {
                    let _ = waiter.send(Err(err.clone()));
                }
                if torn_down {
                    self.events.emit(SessionEvent::Terminated {
                        reason: err.to_string(),
                    });
                }
            }
        }
    }

    /// Clear the credentials this renewal was started for. A login or logout
    /// that happened meanwhile owns the store now and is left alone.
    fn tear_down(&self, generation: u64, err: ApiError) -> Settled {
        match self.store.clear_if_current(generation) {
            Ok(false) => {
                debug!(error = %err, "Renewal failed after the session changed");
                Settled::Failed {
                    err,
                    torn_down: false,
                }
            }
            Ok(true) => {
                error!(error = %err, "Token renewal failed, ending session");
                Settled::Failed {
                    err,
                    torn_down: true,
                }
            }
            Err(clear_err) => {
                error!(
                    error = %err,
                    storage_error = %clear_err,
                    "Token renewal failed, ending session; stored refresh token could not be removed"
                );
                Settled::Failed {
                    err,
                    torn_down: true,
                }
            }
        }
    }

    /// The session this renewal belonged to ended while it was running.
    fn superseded(&self) -> Settled {
        info!("Session changed during token renewal, discarding new credentials");
        Settled::Failed {
            err: ApiError::SessionExpired("Session ended during token renewal".to_string()),
            torn_down: false,
        }
    }

    async fn renew_once(&self) -> Result<TokenPair> {
        let refresh_token = self
            .store
            .refresh()?
            .ok_or_else(|| ApiError::SessionExpired("No refresh token stored".to_string()))?;

        match tokio::time::timeout(self.timeout, self.renewer.renew(&refresh_token)).await {
            Ok(result) => result,
            Err(_) => Err(ApiError::RenewalTimeout(self.timeout)),
        }
    }
}
