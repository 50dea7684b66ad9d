//! Shared fixtures for the HTTP-level tests: fake providers, a failing
//! store and a server bound to an ephemeral port.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chuef_api::captcha::{CaptchaVerdict, CaptchaVerifier};
use chuef_api::config::AppConfig;
use chuef_api::database::{
    ChatMessageRecord, ChatMessageView, ContactSubmissionRecord, InputStore, MemoryStore,
    NewChatMessage, NewContactSubmission, NewInput, StoreError, StoreResult,
};
use chuef_api::embedding::{Embedder, Embedding, EmbeddingError, EmbeddingUsage};
use chuef_api::gateway::auth::{SessionClaims, issue_session_token};
use chuef_api::server::router;
use chuef_api::{AppState, Dependencies};
use tokio::net::TcpListener;
use uuid::Uuid;

pub const JWT_SECRET: &str = "integration-test-secret";
pub const GOOD_CAPTCHA: &str = "good-token";
pub const DIMENSIONS: usize = 8;

/// Embeds every text as a constant vector, or fails on demand.
#[derive(Debug, Default)]
pub struct FakeEmbedder {
    pub fail: bool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(EmbeddingError::Api {
                status: 500,
                body: "provider down".to_string(),
            });
        }
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }
        Ok(Embedding {
            vector: vec![0.25; DIMENSIONS],
            model: "fake-embedding".to_string(),
            usage: EmbeddingUsage::default(),
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError> {
        let mut out = Vec::new();
        for text in texts.iter().filter(|t| !t.trim().is_empty()) {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn model(&self) -> &str {
        "fake-embedding"
    }
}

/// Accepts [`GOOD_CAPTCHA`] and nothing else.
#[derive(Debug, Default)]
pub struct FakeCaptcha {
    pub calls: AtomicUsize,
}

#[async_trait]
impl CaptchaVerifier for FakeCaptcha {
    async fn verify(&self, token: &str, _remote_ip: Option<&str>) -> CaptchaVerdict {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if token == GOOD_CAPTCHA {
            CaptchaVerdict::accept(Some(0.9))
        } else {
            CaptchaVerdict::reject("Captcha verification failed")
        }
    }
}

/// Delegates to a [`MemoryStore`] but fails the domain inserts it is told to.
#[derive(Debug)]
pub struct FailingDomainStore {
    pub inner: Arc<MemoryStore>,
    pub chat_error: Option<StoreError>,
    pub contact_error: Option<StoreError>,
}

impl FailingDomainStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            chat_error: None,
            contact_error: None,
        }
    }
}

#[async_trait]
impl InputStore for FailingDomainStore {
    async fn insert_input(&self, input: &NewInput) -> StoreResult<Uuid> {
        self.inner.insert_input(input).await
    }

    async fn delete_input(&self, id: Uuid) -> StoreResult<()> {
        self.inner.delete_input(id).await
    }

    async fn insert_chat_message(
        &self,
        message: &NewChatMessage,
    ) -> StoreResult<ChatMessageRecord> {
        match &self.chat_error {
            Some(e) => Err(e.clone()),
            None => self.inner.insert_chat_message(message).await,
        }
    }

    async fn insert_contact_submission(
        &self,
        submission: &NewContactSubmission,
    ) -> StoreResult<ContactSubmissionRecord> {
        match &self.contact_error {
            Some(e) => Err(e.clone()),
            None => self.inner.insert_contact_submission(submission).await,
        }
    }

    async fn recent_chat_messages(
        &self,
        room: &str,
        limit: usize,
    ) -> StoreResult<Vec<ChatMessageView>> {
        self.inner.recent_chat_messages(room, limit).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }
}

/// Configuration with sessions enabled and the in-memory chat cooldown off.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.auth.jwt_secret = Some(JWT_SECRET.to_string());
    config.ingest.memory_chat_cooldown = false;
    config
}

/// A running test server and handles on its collaborators.
pub struct TestServer {
    pub base_url: String,
    pub store: Arc<MemoryStore>,
    pub embedder: Arc<FakeEmbedder>,
    pub captcha: Arc<FakeCaptcha>,
    pub client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn start(config: AppConfig) -> Self {
        Self::start_with(config, FakeEmbedder::default(), None).await
    }

    /// Start a server. `inputs` replaces the memory store as the ledger
    /// when given; profiles always come from the memory store.
    pub async fn start_with(
        config: AppConfig,
        embedder: FakeEmbedder,
        inputs: Option<Arc<dyn InputStore>>,
    ) -> Self {
        let embedder = Arc::new(embedder);
        let captcha = Arc::new(FakeCaptcha::default());

        let mut deps = Dependencies::in_memory(
            &config,
            Arc::clone(&captcha) as Arc<dyn CaptchaVerifier>,
            Arc::clone(&embedder) as Arc<dyn Embedder>,
        );
        let cooldown = config.ingest.memory_cooldown();
        let store = Arc::new(MemoryStore::new().with_chat_cooldown(cooldown));
        deps.inputs = inputs.unwrap_or_else(|| Arc::clone(&store) as Arc<dyn InputStore>);
        deps.profiles = Arc::clone(&store) as _;

        let app = router(AppState::new(config, deps));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://127.0.0.1:{port}"),
            store,
            embedder,
            captcha,
            client: reqwest::Client::new(),
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `POST /api/ingest` from the given client address.
    pub async fn ingest(
        &self,
        body: &serde_json::Value,
        client_ip: &str,
        token: Option<&str>,
    ) -> reqwest::Response {
        let mut request = self
            .client
            .post(self.url("/api/ingest"))
            .header("x-forwarded-for", client_ip)
            .json(body);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        request.send().await.unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A signed session token for a fresh user.
pub fn session_for(user_id: Uuid, full_name: Option<&str>) -> String {
    let mut claims = SessionClaims::new(user_id, 3600);
    claims.email = Some("someone@example.com".to_string());
    claims.user_metadata.full_name = full_name.map(str::to_string);
    claims.user_metadata.avatar_url = Some("https://cdn.example.com/a.png".to_string());
    claims.app_metadata.provider = Some("google".to_string());
    issue_session_token(&claims, JWT_SECRET).unwrap()
}
