//! Shared service handles.

use std::sync::Arc;

use hemabridge_core::auth::{LoginThrottle, ThrottleConfig, TokenIssuer};
use hemabridge_core::chat::ChatAssistant;
use hemabridge_core::model::ModelHandler;
use hemabridge_core::store::{Store, StoreError};

use crate::error::ApiError;

/// Everything a request handler may touch.
///
/// Built once at startup and cloned into each request; every field is a
/// cheap handle onto shared state.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Persistence.
    pub store: Store,
    /// Image classification boundary.
    pub model: Arc<ModelHandler>,
    /// Chat responder.
    pub chat: Arc<ChatAssistant>,
    /// Token signing and verification.
    pub tokens: Arc<TokenIssuer>,
    /// Failed-login limiter.
    pub throttle: Arc<LoginThrottle>,
}

impl AppState {
    /// Creates state with the built-in chat knowledge base.
    #[must_use]
    pub fn new(
        store: Store,
        model: ModelHandler,
        tokens: TokenIssuer,
        throttle: ThrottleConfig,
    ) -> Self {
        Self {
            store,
            model: Arc::new(model),
            chat: Arc::new(ChatAssistant::default()),
            tokens: Arc::new(tokens),
            throttle: Arc::new(LoginThrottle::new(throttle)),
        }
    }

    /// Runs `query` against the store on the blocking pool.
    pub async fn db<T, F>(&self, query: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Store) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        blocking(move || query(&store)).await
    }

    /// Replaces the chat responder.
    #[must_use]
    pub fn with_chat(mut self, chat: ChatAssistant) -> Self {
        self.chat = Arc::new(chat);
        self
    }
}

/// Moves synchronous work (`SQLite`, password hashing, PDF rendering) off
/// the async workers and onto tokio's blocking pool.
pub(crate) async fn blocking<T, E, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
    ApiError: From<E>,
{
    Ok(tokio::task::spawn_blocking(work).await??)
}
