//! The live messaging session, seen from the service's side.
//!
//! A provider authenticates through a challenge/response pairing flow,
//! streams history and live traffic as [`ProviderEvent`]s while syncing, and
//! performs the few outbound operations the API exposes.

pub mod loopback;

use async_trait::async_trait;
use chat_store::{MediaDescriptor, MediaDownloadInfo, MessageRecord};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use loopback::{LoopbackHandle, LoopbackProvider, SentMessage};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("not connected")]
    Disconnected,
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Progress of a pairing attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// A fresh code to show the user. Replaces any earlier one.
    Challenge(String),
    Success,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub id: String,
    pub chat_jid: String,
    /// Display name of the chat, when the session knows one.
    pub chat_name: Option<String>,
    pub sender: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub is_from_me: bool,
    pub media: Option<MediaDescriptor>,
}

impl IncomingMessage {
    pub fn to_record(&self) -> MessageRecord {
        MessageRecord {
            id: self.id.clone(),
            chat_jid: self.chat_jid.clone(),
            sender: self.sender.clone(),
            content: self.content.clone(),
            timestamp: self.timestamp,
            is_from_me: self.is_from_me,
            media: self.media.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    Message(IncomingMessage),
    /// Chat metadata without a message, e.g. from a history sync.
    Chat {
        jid: String,
        name: Option<String>,
        last_activity: DateTime<Utc>,
    },
}

#[async_trait]
pub trait MessagingProvider: Send + Sync {
    /// Run the pairing flow until it succeeds, fails, or `cancel` fires.
    async fn authenticate(
        &self,
        events: mpsc::Sender<AuthEvent>,
        cancel: CancellationToken,
    ) -> Result<(), ProviderError>;

    /// Stream events into `events` until `cancel` fires.
    async fn sync(
        &self,
        events: mpsc::Sender<ProviderEvent>,
        cancel: CancellationToken,
    ) -> Result<(), ProviderError>;

    fn is_authenticated(&self) -> bool;

    fn is_connected(&self) -> bool;

    /// Send a text message; returns the id assigned to it.
    async fn send_text(&self, recipient: &str, text: &str) -> Result<String, ProviderError>;

    /// Fetch and decrypt a media payload.
    async fn download_media(&self, media: &MediaDownloadInfo) -> Result<Vec<u8>, ProviderError>;
}
