//! Shared harness: a full service wired to an unpaired loopback session.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use chat_store::{ChatStore, MediaDescriptor};
use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use wa_bridge::api::{build_router, ApiState};
use wa_bridge::provider::{IncomingMessage, LoopbackHandle, LoopbackProvider, MessagingProvider};
use wa_bridge::{App, Config, SyncCoordinator};

pub const API_KEY: &str = "integration-key";

pub struct Harness {
    pub router: Router,
    pub coordinator: Arc<SyncCoordinator>,
    pub store: Arc<ChatStore>,
    pub handle: LoopbackHandle,
    pub cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    _tmp: tempfile::TempDir,
}

impl Harness {
    /// Boot the same way the binary does, but with an unpaired session.
    pub fn boot(tweak: impl FnOnce(&mut Config)) -> Self {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut config = Config {
            api_key: API_KEY.to_string(),
            store_dir: tmp.path().to_string_lossy().into_owned(),
            ..Config::default()
        };
        tweak(&mut config);

        let store = Arc::new(ChatStore::open(&config.db_path()).unwrap());
        let (provider, handle) = LoopbackProvider::new();
        let provider: Arc<dyn MessagingProvider> = Arc::new(provider);
        let app = Arc::new(App::new(
            Arc::clone(&store),
            Arc::clone(&provider),
            config.media_dir(),
        ));

        let coordinator = Arc::new(SyncCoordinator::new());
        let cancel = CancellationToken::new();
        let tasks = vec![
            coordinator.start_qr_auth(provider, cancel.clone()),
            coordinator.start_background_sync(app.clone(), cancel.clone()),
        ];

        let state = ApiState::new(&config, app, Arc::clone(&coordinator));
        Self {
            router: build_router(state, config.request_timeout()),
            coordinator,
            store,
            handle,
            cancel,
            tasks,
            _tmp: tmp,
        }
    }

    pub async fn request(&self, request: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, headers, bytes)
    }

    pub async fn get_raw(&self, uri: &str) -> (StatusCode, HeaderMap, Bytes) {
        self.request(authed(uri)).await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let (status, _, bytes) = self.get_raw(uri).await;
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            tokio::time::timeout(Duration::from_secs(5), task)
                .await
                .expect("background task did not stop")
                .unwrap();
        }
    }
}

pub fn authed(uri: &str) -> Request<Body> {
    Request::get(uri)
        .header("X-API-Key", API_KEY)
        .body(Body::empty())
        .unwrap()
}

pub async fn wait_for(what: &str, mut check: impl FnMut() -> bool) {
    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "timed out waiting for {what}");
}

pub fn text_message(id: &str, chat: &str, name: Option<&str>, content: &str, at: DateTime<Utc>) -> IncomingMessage {
    IncomingMessage {
        id: id.to_string(),
        chat_jid: chat.to_string(),
        chat_name: name.map(str::to_string),
        sender: chat.split('@').next().unwrap_or_default().to_string(),
        content: content.to_string(),
        timestamp: at,
        is_from_me: false,
        media: None,
    }
}

/// Image descriptor whose digest matches `payload`.
pub fn image_media(direct_path: &str, payload: &[u8]) -> MediaDescriptor {
    MediaDescriptor {
        media_type: "image".to_string(),
        filename: "holiday.jpg".to_string(),
        url: format!("https://media.invalid{direct_path}"),
        direct_path: direct_path.to_string(),
        mime_type: "image/jpeg".to_string(),
        media_key: vec![7; 32],
        file_sha256: Sha256::digest(payload).to_vec(),
        file_enc_sha256: vec![9; 32],
        file_length: payload.len() as u64,
    }
}
