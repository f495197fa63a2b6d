//! HTTP API over a locally synchronized messaging history.
//!
//! A background task keeps a SQLite store ([`chat_store`]) in step with the
//! live messaging session while the API serves paginated, recipient-filtered
//! reads of that store.

pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod filter;
pub mod logging;
pub mod provider;
pub mod qr;
pub mod sync;

pub use app::App;
pub use config::Config;
pub use error::ApiError;
pub use filter::SuffixFilter;
pub use sync::{Readiness, SyncCoordinator, SyncStatus};
