use crate::accumulator::{self, StreamCallbacks, StreamOutcome};
use crate::config::OllamaConfig;
use crate::error::ChatError;
use crate::providers::{ChannelCallbacks, Provider, StreamEvent};
use crate::types::{ChatMessage, ConversationTurn, ModelInfo, Role};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use url::Url;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Empty means the local default; a trailing slash is dropped
pub fn normalize_base_url(base_url: &str) -> String {
    let trimmed = base_url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        DEFAULT_BASE_URL.to_string()
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct OllamaProvider {
    base_url: String,
    client: reqwest::Client,
}

// Ollama API types
#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaTagsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

impl OllamaProvider {
    pub fn new(base_url: impl AsRef<str>) -> Self {
        Self {
            base_url: normalize_base_url(base_url.as_ref()),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &OllamaConfig) -> Self {
        Self::new(config.base_url.as_deref().unwrap_or_default())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, ChatError> {
        Url::parse(&format!("{}/{}", self.base_url, path))
            .map_err(|_| ChatError::InvalidBaseUrl(self.base_url.clone()))
    }

    /// Role-tagged message list: prior turns followed by the new user turn
    pub fn build_messages(history: &[ConversationTurn], new_user_text: &str) -> Vec<ChatMessage> {
        history
            .iter()
            .map(ConversationTurn::to_message)
            .chain(std::iter::once(ChatMessage {
                role: Role::User,
                content: new_user_text.to_string(),
            }))
            .collect()
    }

    async fn fetch_tags(&self) -> Result<Vec<ModelInfo>, ChatError> {
        let res = self
            .client
            .get(self.endpoint("api/tags")?)
            .send()
            .await
            .map_err(ChatError::Network)?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ChatError::from_status(status, &body));
        }

        let tags: OllamaTagsResponse = res.json().await.map_err(ChatError::Body)?;
        Ok(tags.models)
    }

    /// Full model records from `/api/tags`; empty on any failure
    pub async fn list_model_info(&self) -> Vec<ModelInfo> {
        match self.fetch_tags().await {
            Ok(models) => {
                debug!("Found {} Ollama models at {}", models.len(), self.base_url);
                models
            }
            Err(e) => {
                warn!("Failed to fetch Ollama models from {}: {}", self.base_url, e);
                Vec::new()
            }
        }
    }

    /// Run a chat stream on a background task and receive its callbacks as events.
    ///
    /// Cancel the returned token, or drop the receiver, to abort the request.
    pub fn stream_events(
        &self,
        model: &str,
        history: &[ConversationTurn],
        new_user_text: &str,
    ) -> (mpsc::UnboundedReceiver<StreamEvent>, CancellationToken) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let provider = self.clone();
        let model = model.to_string();
        let history = history.to_vec();
        let new_user_text = new_user_text.to_string();
        let token = cancel.clone();

        tokio::spawn(async move {
            let mut callbacks = ChannelCallbacks::new(tx, token.clone());
            provider
                .stream_chat(&model, &history, &new_user_text, &mut callbacks, &token)
                .await;
        });

        (rx, cancel)
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn list_models(&self) -> Vec<String> {
        self.list_model_info()
            .await
            .into_iter()
            .map(|m| m.name)
            .collect()
    }

    async fn stream_chat(
        &self,
        model: &str,
        history: &[ConversationTurn],
        new_user_text: &str,
        callbacks: &mut dyn StreamCallbacks,
        cancel: &CancellationToken,
    ) -> StreamOutcome {
        let url = match self.endpoint("api/chat") {
            Ok(url) => url,
            Err(e) => {
                callbacks.on_error(e);
                return StreamOutcome::Failed;
            }
        };

        let request = OllamaChatRequest {
            model,
            messages: Self::build_messages(history, new_user_text),
            stream: true,
        };

        debug!(
            model,
            messages = request.messages.len(),
            "Sending Ollama chat request to {}",
            url
        );

        let send = self.client.post(url).json(&request).send();
        let res = tokio::select! {
            biased;
            _ = cancel.cancelled() => return StreamOutcome::Cancelled,
            res = send => res,
        };

        let res = match res {
            Ok(r) => r,
            Err(e) => {
                error!("Ollama request failed: {}", e);
                callbacks.on_error(ChatError::Network(e));
                return StreamOutcome::Failed;
            }
        };

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            error!("Ollama API error: {} {}", status, body);
            callbacks.on_error(ChatError::from_status(status, &body));
            return StreamOutcome::Failed;
        }

        // Ollama streams newline-delimited JSON (not SSE)
        let outcome = accumulator::consume(res.bytes_stream(), callbacks, cancel).await;
        if outcome == StreamOutcome::Failed {
            error!("Ollama stream for model {} ended with a read error", model);
        }

        outcome
    }
}

/// Model names served at `base_url`; empty when the server is unreachable
pub async fn list_models(base_url: &str) -> Vec<String> {
    OllamaProvider::new(base_url).list_models().await
}

/// Single-attempt streamed chat against the configured server
pub async fn stream_chat(
    model: &str,
    history: &[ConversationTurn],
    new_user_text: &str,
    callbacks: &mut dyn StreamCallbacks,
    config: &OllamaConfig,
) -> StreamOutcome {
    OllamaProvider::from_config(config)
        .stream_chat(model, history, new_user_text, callbacks, &CancellationToken::new())
        .await
}
