use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Filters ──────────────────────────────────────────────────────

/// Substring patterns restricting which chat addresses a query may touch.
///
/// An address matches a set when it contains any entry verbatim. `None` and
/// `Some(vec![])` both mean "no constraint".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressPatterns {
    pub include: Option<Vec<String>>,
    pub exclude: Option<Vec<String>>,
}

impl AddressPatterns {
    pub fn include(&self) -> Option<&[String]> {
        self.include.as_deref().filter(|p| !p.is_empty())
    }

    pub fn exclude(&self) -> Option<&[String]> {
        self.exclude.as_deref().filter(|p| !p.is_empty())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListMessagesParams {
    pub chat_jid: Option<String>,
    /// Content substring, ASCII case-insensitive.
    pub query: Option<String>,
    pub limit: usize,
    /// Zero-based page of `limit` rows.
    pub page: usize,
    pub patterns: AddressPatterns,
    /// Only messages strictly newer than this.
    pub after: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct ListChatsParams {
    /// Chat name substring, ASCII case-insensitive.
    pub query: Option<String>,
    pub limit: usize,
    pub page: usize,
    pub patterns: AddressPatterns,
}

#[derive(Debug, Clone, Default)]
pub struct SearchContactsParams {
    /// Name substring; empty matches every contact.
    pub query: String,
    pub patterns: AddressPatterns,
}

// ── Write side ───────────────────────────────────────────────────

/// Media attached to a message, as announced by the messaging session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    /// "image", "video", "audio", "document", ...
    pub media_type: String,
    pub filename: String,
    pub url: String,
    pub direct_path: String,
    pub mime_type: String,
    pub media_key: Vec<u8>,
    /// SHA-256 of the decrypted payload.
    pub file_sha256: Vec<u8>,
    /// SHA-256 of the encrypted payload as served by the media host.
    pub file_enc_sha256: Vec<u8>,
    pub file_length: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: String,
    pub chat_jid: String,
    pub sender: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub is_from_me: bool,
    pub media: Option<MediaDescriptor>,
}

// ── Read side ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub chat_jid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_name: Option<String>,
    pub sender: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub is_from_me: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub jid: String,
    pub name: String,
    pub last_message_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_is_from_me: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub jid: String,
    pub phone_number: String,
    pub name: String,
}

/// Everything needed to fetch a message's media and to know whether that
/// already happened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaDownloadInfo {
    pub id: String,
    pub chat_jid: String,
    pub media_type: String,
    pub filename: String,
    pub url: String,
    pub direct_path: String,
    pub mime_type: String,
    pub media_key: Vec<u8>,
    pub file_sha256: Vec<u8>,
    pub file_enc_sha256: Vec<u8>,
    pub file_length: u64,
    pub local_path: Option<String>,
    pub downloaded_at: Option<DateTime<Utc>>,
}

impl MediaDownloadInfo {
    pub fn has_media(&self) -> bool {
        !self.media_type.is_empty()
    }
}
