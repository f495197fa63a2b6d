//! In-process provider driven through a [`LoopbackHandle`].
//!
//! Nothing leaves the process: challenges, pairing, inbound traffic and
//! media payloads are all supplied by whoever holds the handle. Outbound
//! sends are recorded for inspection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chat_store::MediaDownloadInfo;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use super::{AuthEvent, IncomingMessage, MessagingProvider, ProviderError, ProviderEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub id: String,
    pub recipient: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Default)]
struct Shared {
    authenticated: AtomicBool,
    connected: AtomicBool,
    sent: Mutex<Vec<SentMessage>>,
    /// Payloads keyed by direct path.
    media: Mutex<HashMap<String, Vec<u8>>>,
}

pub struct LoopbackProvider {
    shared: Arc<Shared>,
    auth_rx: AsyncMutex<mpsc::UnboundedReceiver<AuthEvent>>,
    event_rx: AsyncMutex<mpsc::UnboundedReceiver<ProviderEvent>>,
}

/// Control side of a [`LoopbackProvider`]. Cheap to clone.
#[derive(Clone)]
pub struct LoopbackHandle {
    shared: Arc<Shared>,
    auth_tx: mpsc::UnboundedSender<AuthEvent>,
    event_tx: mpsc::UnboundedSender<ProviderEvent>,
}

impl LoopbackProvider {
    /// An unpaired session. Authentication waits for the handle.
    pub fn new() -> (Self, LoopbackHandle) {
        let shared = Arc::new(Shared::default());
        let (auth_tx, auth_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let provider = Self {
            shared: Arc::clone(&shared),
            auth_rx: AsyncMutex::new(auth_rx),
            event_rx: AsyncMutex::new(event_rx),
        };
        let handle = LoopbackHandle {
            shared,
            auth_tx,
            event_tx,
        };
        (provider, handle)
    }

    /// A session that is already paired and connected.
    pub fn paired() -> (Self, LoopbackHandle) {
        let (provider, handle) = Self::new();
        provider.shared.authenticated.store(true, Ordering::SeqCst);
        provider.shared.connected.store(true, Ordering::SeqCst);
        (provider, handle)
    }
}

#[async_trait]
impl MessagingProvider for LoopbackProvider {
    async fn authenticate(
        &self,
        events: mpsc::Sender<AuthEvent>,
        cancel: CancellationToken,
    ) -> Result<(), ProviderError> {
        if self.is_authenticated() {
            let _ = events.send(AuthEvent::Success).await;
            return Ok(());
        }

        let mut auth_rx = self.auth_rx.lock().await;
        loop {
            let step = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                step = auth_rx.recv() => step,
            };

            match step {
                Some(AuthEvent::Challenge(code)) => {
                    debug!("loopback issued pairing challenge");
                    events
                        .send(AuthEvent::Challenge(code))
                        .await
                        .map_err(|_| ProviderError::Protocol("auth listener dropped".into()))?;
                }
                Some(AuthEvent::Success) => {
                    self.shared.authenticated.store(true, Ordering::SeqCst);
                    self.shared.connected.store(true, Ordering::SeqCst);
                    info!("loopback session paired");
                    let _ = events.send(AuthEvent::Success).await;
                    return Ok(());
                }
                None => {
                    return Err(ProviderError::Protocol("pairing channel closed".into()));
                }
            }
        }
    }

    async fn sync(
        &self,
        events: mpsc::Sender<ProviderEvent>,
        cancel: CancellationToken,
    ) -> Result<(), ProviderError> {
        if !self.is_authenticated() {
            return Err(ProviderError::NotAuthenticated);
        }

        let mut event_rx = self.event_rx.lock().await;
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                event = event_rx.recv() => event,
            };

            match event {
                Some(event) => {
                    if events.send(event).await.is_err() {
                        return Err(ProviderError::Disconnected);
                    }
                }
                // Every handle is gone; nothing more can arrive.
                None => {
                    cancel.cancelled().await;
                    return Ok(());
                }
            }
        }
    }

    fn is_authenticated(&self) -> bool {
        self.shared.authenticated.load(Ordering::SeqCst)
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    async fn send_text(&self, recipient: &str, text: &str) -> Result<String, ProviderError> {
        if !self.is_authenticated() {
            return Err(ProviderError::NotAuthenticated);
        }
        if !self.is_connected() {
            return Err(ProviderError::Disconnected);
        }

        let id = Uuid::new_v4().simple().to_string().to_uppercase();
        self.shared.sent.lock().push(SentMessage {
            id: id.clone(),
            recipient: recipient.to_string(),
            text: text.to_string(),
            timestamp: Utc::now(),
        });
        Ok(id)
    }

    async fn download_media(&self, media: &MediaDownloadInfo) -> Result<Vec<u8>, ProviderError> {
        if !self.is_authenticated() {
            return Err(ProviderError::NotAuthenticated);
        }
        if !self.is_connected() {
            return Err(ProviderError::Disconnected);
        }
        if media.direct_path.is_empty() {
            return Err(ProviderError::Unsupported(format!(
                "{} media of message {} has no download path",
                media.media_type, media.id
            )));
        }

        self.shared
            .media
            .lock()
            .get(&media.direct_path)
            .cloned()
            .ok_or_else(|| {
                ProviderError::Protocol(format!("media for message {} is not available", media.id))
            })
    }
}

impl LoopbackHandle {
    pub fn issue_challenge(&self, code: impl Into<String>) {
        let _ = self.auth_tx.send(AuthEvent::Challenge(code.into()));
    }

    /// Complete the pending pairing attempt.
    pub fn pair(&self) {
        let _ = self.auth_tx.send(AuthEvent::Success);
    }

    pub fn push_message(&self, message: IncomingMessage) {
        let _ = self.event_tx.send(ProviderEvent::Message(message));
    }

    pub fn push_chat(&self, jid: &str, name: Option<&str>, last_activity: DateTime<Utc>) {
        let _ = self.event_tx.send(ProviderEvent::Chat {
            jid: jid.to_string(),
            name: name.map(str::to_string),
            last_activity,
        });
    }

    /// Make `bytes` downloadable for media announced with `direct_path`.
    pub fn add_media(&self, direct_path: &str, bytes: Vec<u8>) {
        self.shared.media.lock().insert(direct_path.to_string(), bytes);
    }

    pub fn set_connected(&self, connected: bool) {
        self.shared.connected.store(connected, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.shared.sent.lock().clone()
    }
}
