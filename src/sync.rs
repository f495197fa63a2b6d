//! Authentication and synchronization state shared between the HTTP layer
//! and the background tasks.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::provider::{AuthEvent, MessagingProvider, ProviderError};
use crate::qr;

/// Upper bound on how long the sync task sleeps between authentication
/// checks.
pub const AUTH_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Invoked once per message persisted during a sync.
pub type MessageCallback = Arc<dyn Fn() + Send + Sync>;

/// Whatever runs the long-lived sync once the session is authenticated.
#[async_trait]
pub trait SyncDriver: Send + Sync {
    /// Block until `cancel` fires or the session ends.
    async fn sync(
        &self,
        cancel: CancellationToken,
        on_message: MessageCallback,
    ) -> Result<(), ProviderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    NotReady(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub running: bool,
    pub messages_synced: u64,
}

#[derive(Default)]
pub struct SyncCoordinator {
    authenticated: AtomicBool,
    syncing: AtomicBool,
    sync_running: AtomicBool,
    messages_synced: AtomicU64,
    current_qr: RwLock<String>,
    auth_notify: Notify,
}

/// Clears the running flags when the sync task leaves its critical section,
/// however it leaves.
struct RunningGuard<'a>(&'a SyncCoordinator);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.sync_running.store(false, Ordering::SeqCst);
        self.0.syncing.store(false, Ordering::SeqCst);
    }
}

impl SyncCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_authenticated(&self) {
        self.authenticated.store(true, Ordering::SeqCst);
        self.auth_notify.notify_one();
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    /// Pending pairing code, empty when there is none.
    pub fn current_qr(&self) -> String {
        self.current_qr.read().clone()
    }

    pub fn set_current_qr(&self, code: &str) {
        *self.current_qr.write() = code.to_string();
    }

    pub fn readiness(&self) -> Readiness {
        let authenticated = self.is_authenticated();
        let syncing = self.is_syncing();
        match (authenticated, syncing) {
            (true, true) => Readiness::Ready,
            (false, _) => Readiness::NotReady("not authenticated"),
            (true, false) => Readiness::NotReady("not syncing"),
        }
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            running: self.sync_running.load(Ordering::SeqCst),
            messages_synced: self.messages_synced.load(Ordering::SeqCst),
        }
    }

    /// Spawn the sync task.
    ///
    /// It waits for authentication, then runs `driver` exactly once. A
    /// failed sync is logged and not retried; cancellation before
    /// authentication ends the task without syncing.
    pub fn start_background_sync(
        self: &Arc<Self>,
        driver: Arc<dyn SyncDriver>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while !this.is_authenticated() {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("sync cancelled before authentication");
                        return;
                    }
                    _ = this.auth_notify.notified() => {}
                    _ = tokio::time::sleep(AUTH_POLL_INTERVAL) => {}
                }
            }
            if cancel.is_cancelled() {
                return;
            }

            info!("Starting background sync");
            this.sync_running.store(true, Ordering::SeqCst);
            this.syncing.store(true, Ordering::SeqCst);
            let _running = RunningGuard(&this);

            let counter = Arc::clone(&this);
            let on_message: MessageCallback = Arc::new(move || {
                counter.messages_synced.fetch_add(1, Ordering::SeqCst);
            });

            match driver.sync(cancel, on_message).await {
                Ok(()) => info!("Background sync stopped"),
                Err(e) => error!("Background sync failed: {}", e),
            }
        })
    }

    /// Spawn the pairing task.
    ///
    /// Every challenge replaces the current code and is printed to stderr
    /// as a terminal QR code. Success clears the code and marks the session
    /// authenticated.
    pub fn start_qr_auth(
        self: &Arc<Self>,
        provider: Arc<dyn MessagingProvider>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let (tx, mut rx) = mpsc::channel::<AuthEvent>(16);

            let auth = {
                let cancel = cancel.clone();
                async move { provider.authenticate(tx, cancel).await }
            };
            let apply = async {
                while let Some(event) = rx.recv().await {
                    this.apply_auth_event(event);
                }
            };

            let (result, ()) = tokio::join!(auth, apply);
            if let Err(e) = result {
                if !cancel.is_cancelled() {
                    warn!("QR authentication failed: {}", e);
                }
            }
        })
    }

    fn apply_auth_event(&self, event: AuthEvent) {
        match event {
            AuthEvent::Challenge(code) => {
                self.set_current_qr(&code);
                qr::print_to_stderr(&code);
            }
            AuthEvent::Success => {
                self.set_current_qr("");
                self.mark_authenticated();
                info!("Authentication successful");
            }
        }
    }
}
