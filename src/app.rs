//! Glue between the messaging provider and the chat store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chat_store::address::normalize_recipient;
use chat_store::{ChatStore, MediaDownloadInfo, MessageRecord, StoreError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::provider::{MessagingProvider, ProviderError, ProviderEvent};
use crate::sync::{MessageCallback, SyncDriver};

/// Sender recorded on messages this service sends.
pub const OUTBOUND_SENDER: &str = "me";

const EVENT_BUFFER: usize = 256;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("media io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("message {0} has no media")]
    NoMedia(String),

    #[error("media for message {0} failed its integrity check")]
    Integrity(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendReceipt {
    pub id: String,
    pub recipient: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub path: PathBuf,
    pub mime_type: String,
}

pub struct App {
    store: Arc<ChatStore>,
    provider: Arc<dyn MessagingProvider>,
    media_dir: PathBuf,
}

impl App {
    pub fn new(store: Arc<ChatStore>, provider: Arc<dyn MessagingProvider>, media_dir: PathBuf) -> Self {
        Self {
            store,
            provider,
            media_dir,
        }
    }

    pub fn store(&self) -> &Arc<ChatStore> {
        &self.store
    }

    pub fn is_authenticated(&self) -> bool {
        self.provider.is_authenticated()
    }

    pub fn is_connected(&self) -> bool {
        self.provider.is_connected()
    }

    /// Send `text` and keep a copy in the store.
    ///
    /// Bare phone numbers are turned into direct-chat addresses. A failure
    /// to record the sent message is logged; the send itself already
    /// happened.
    pub async fn send_text(&self, recipient: &str, text: &str) -> Result<SendReceipt, AppError> {
        let jid = normalize_recipient(recipient);
        let id = self.provider.send_text(&jid, text).await?;
        let timestamp = Utc::now();

        let record = MessageRecord {
            id: id.clone(),
            chat_jid: jid.clone(),
            sender: OUTBOUND_SENDER.to_string(),
            content: text.to_string(),
            timestamp,
            is_from_me: true,
            media: None,
        };
        if let Err(e) = self
            .store
            .store_chat(&jid, &jid, timestamp)
            .and_then(|()| self.store.store_message(&record))
        {
            warn!("Sent message {} but could not record it: {}", id, e);
        }

        info!("Sent message {} to {}", id, jid);
        Ok(SendReceipt {
            id,
            recipient: jid,
            timestamp,
        })
    }

    /// Local file holding a message's media, downloading it on first use.
    pub async fn media_file(&self, id: &str, chat_jid: Option<&str>) -> Result<MediaFile, AppError> {
        let info = self.store.get_message_for_download(id, chat_jid)?;
        if !info.has_media() {
            return Err(AppError::NoMedia(id.to_string()));
        }
        let mime_type = mime_type_of(&info);

        if let Some(existing) = info.local_path.as_deref().map(PathBuf::from) {
            if tokio::fs::try_exists(&existing).await.unwrap_or(false) {
                debug!("Serving cached media for message {}", id);
                return Ok(MediaFile {
                    path: existing,
                    mime_type,
                });
            }
            warn!(
                "Media for message {} was recorded at {} but is gone, downloading again",
                id,
                existing.display()
            );
            self.store.forget_media_download(&info.id, &info.chat_jid)?;
        }

        let bytes = self.provider.download_media(&info).await?;
        verify_digest(&info, &bytes)?;

        let dir = self.media_dir.join(sanitize(&info.chat_jid));
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(file_name(&info, &mime_type));
        tokio::fs::write(&path, &bytes).await?;

        self.store.mark_media_downloaded(
            &info.id,
            &info.chat_jid,
            &path.to_string_lossy(),
            Utc::now(),
        )?;
        info!(
            "Downloaded {} bytes of {} for message {}",
            bytes.len(),
            info.media_type,
            info.id
        );

        Ok(MediaFile { path, mime_type })
    }

    async fn process_events(
        &self,
        mut rx: mpsc::Receiver<ProviderEvent>,
        on_message: MessageCallback,
    ) -> u64 {
        let mut stored = 0u64;
        while let Some(event) = rx.recv().await {
            match self.persist_event(&event) {
                Ok(true) => {
                    stored += 1;
                    on_message();
                }
                Ok(false) => {}
                Err(e) => warn!("Failed to persist sync event: {}", e),
            }
        }
        stored
    }

    /// Returns whether a message was stored.
    fn persist_event(&self, event: &ProviderEvent) -> Result<bool, StoreError> {
        match event {
            ProviderEvent::Message(message) => {
                let name = message.chat_name.as_deref().unwrap_or(&message.chat_jid);
                self.store
                    .store_chat(&message.chat_jid, name, message.timestamp)?;
                self.store.store_message(&message.to_record())?;
                Ok(true)
            }
            ProviderEvent::Chat {
                jid,
                name,
                last_activity,
            } => {
                self.store
                    .store_chat(jid, name.as_deref().unwrap_or(jid), *last_activity)?;
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl SyncDriver for App {
    async fn sync(
        &self,
        cancel: CancellationToken,
        on_message: MessageCallback,
    ) -> Result<(), ProviderError> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        let (result, stored) = tokio::join!(
            self.provider.sync(tx, cancel),
            self.process_events(rx, on_message),
        );
        debug!("Sync event loop finished after storing {} messages", stored);
        result
    }
}

fn verify_digest(info: &MediaDownloadInfo, bytes: &[u8]) -> Result<(), AppError> {
    if info.file_sha256.is_empty() {
        return Ok(());
    }
    let actual = Sha256::digest(bytes);
    if actual.as_slice() != info.file_sha256.as_slice() {
        warn!(
            "Media digest mismatch for message {}: expected {}, got {}",
            info.id,
            hex::encode(&info.file_sha256),
            hex::encode(actual)
        );
        return Err(AppError::Integrity(info.id.clone()));
    }
    Ok(())
}

fn mime_type_of(info: &MediaDownloadInfo) -> String {
    if !info.mime_type.is_empty() {
        return info.mime_type.clone();
    }
    mime_guess::from_path(Path::new(&info.filename))
        .first_or_octet_stream()
        .to_string()
}

/// `<id>-<filename>`, or `<id>.<ext>` when the message carried no name.
fn file_name(info: &MediaDownloadInfo, mime_type: &str) -> String {
    let id = sanitize(&info.id);
    let name = sanitize(&info.filename);
    if !name.trim_matches(|c| c == '_' || c == '.').is_empty() {
        return format!("{id}-{name}");
    }
    let ext = mime_guess::get_mime_extensions_str(mime_type)
        .and_then(|exts| exts.first())
        .copied()
        .unwrap_or("bin");
    format!("{id}.{ext}")
}

/// Keep a path component to characters that are safe on every filesystem.
fn sanitize(component: &str) -> String {
    component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '@') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}
