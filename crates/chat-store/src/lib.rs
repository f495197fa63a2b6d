//! SQLite persistence for a synchronized messaging account.
//!
//! Chats and messages are upserted as the live session streams them in and
//! queried back with pagination and substring-based address filtering.
//! Media descriptors travel with each message so a later request can fetch
//! the payload and record where it landed on disk.

pub mod address;
pub mod error;
pub mod store;
pub mod types;

pub use error::{Result, StoreError};
pub use store::ChatStore;
pub use types::{
    AddressPatterns, Chat, Contact, ListChatsParams, ListMessagesParams, MediaDescriptor,
    MediaDownloadInfo, Message, MessageRecord, SearchContactsParams,
};
