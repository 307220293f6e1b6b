//! LLM and embedding capabilities.
//!
//! The classification engine treats language-model chat and embedding
//! generation as opaque capabilities behind the [`LLMClient`] trait. The
//! pipeline, learning subsystem, and batch processor only ever see the
//! trait; [`OpenAiClient`] is the production implementation.
//!
//! ## Example
//!
//! ```rust,ignore
//! use triage_core::llm::{ClientConfig, OpenAiClient, LLMClient, CompletionRequest, ChatMessage};
//!
//! let client = OpenAiClient::new(
//!     ClientConfig::new("your-api-key").with_chat_model("gpt-4o")
//! );
//!
//! let request = CompletionRequest::new()
//!     .with_message(ChatMessage::user("Classify this ticket"));
//! let response = client.complete(request).await?;
//! ```

mod cache;
mod client;
mod types;

pub use cache::{CacheKey, CacheStats, EmbeddingCache};
pub use client::{ClientConfig, LLMClient, OpenAiClient};
pub use types::{
    ChatMessage, ChatRole, CompletionRequest, CompletionResponse, EmbeddingRequest,
    EmbeddingResponse, TokenUsage,
};
