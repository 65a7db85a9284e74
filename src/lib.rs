pub mod accumulator;
pub mod config;
pub mod conversation;
pub mod error;
pub mod providers;
pub mod stats;
pub mod types;

// Re-export commonly used types
pub use accumulator::{StreamAccumulator, StreamCallbacks, StreamOutcome};
pub use config::Config;
pub use conversation::Conversation;
pub use error::ChatError;
pub use providers::ollama::OllamaProvider;
pub use types::{ChatMessage, ConversationTurn, ModelInfo, Role, UsageMetrics};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
