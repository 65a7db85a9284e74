pub mod ollama;

use crate::accumulator::{StreamCallbacks, StreamOutcome};
use crate::error::ChatError;
use crate::types::{ConversationTurn, UsageMetrics};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Chat backend serving a local model
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name
    fn name(&self) -> &str;

    /// Names of the models the backend can serve; empty when unreachable
    async fn list_models(&self) -> Vec<String>;

    /// Send `history` plus `new_user_text` and stream the answer into `callbacks`
    async fn stream_chat(
        &self,
        model: &str,
        history: &[ConversationTurn],
        new_user_text: &str,
        callbacks: &mut dyn StreamCallbacks,
        cancel: &CancellationToken,
    ) -> StreamOutcome;
}

/// Callback invocations forwarded over a channel
#[derive(Debug)]
pub enum StreamEvent {
    Chunk {
        content: String,
        thinking: Option<String>,
    },
    Complete(Option<UsageMetrics>),
    Error(ChatError),
}

/// Forwards callbacks into a channel.
///
/// The channel is unbounded because callbacks are synchronous and the final
/// chunk and completion must never be dropped. Cancels the stream once the
/// receiving side is gone.
pub(crate) struct ChannelCallbacks {
    tx: mpsc::UnboundedSender<StreamEvent>,
    cancel: CancellationToken,
}

impl ChannelCallbacks {
    pub(crate) fn new(tx: mpsc::UnboundedSender<StreamEvent>, cancel: CancellationToken) -> Self {
        Self { tx, cancel }
    }

    fn send(&mut self, event: StreamEvent) {
        if self.tx.send(event).is_err() {
            self.cancel.cancel();
        }
    }
}

impl StreamCallbacks for ChannelCallbacks {
    fn on_chunk(&mut self, content: &str, thinking: Option<&str>) {
        self.send(StreamEvent::Chunk {
            content: content.to_string(),
            thinking: thinking.map(str::to_string),
        });
    }

    fn on_complete(&mut self, usage: Option<UsageMetrics>) {
        self.send(StreamEvent::Complete(usage));
    }

    fn on_error(&mut self, error: ChatError) {
        self.send(StreamEvent::Error(error));
    }
}
