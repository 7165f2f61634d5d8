//! LLM integration.
//!
//! A single client for OpenAI-compatible chat completion endpoints, plus the
//! `LlmProvider` trait that processors depend on so tests can substitute
//! scripted providers.
//!
//! ```ignore
//! use bench_infer::llm::{GenerationRequest, LiteLlmClient, LlmProvider, Message};
//! use std::time::Duration;
//!
//! let client = LiteLlmClient::new(
//!     "https://openrouter.ai/api/v1",
//!     Some(api_key),
//!     "openai/gpt-4o",
//!     Duration::from_secs(120),
//! )?;
//! let response = client
//!     .generate(GenerationRequest::new("", vec![Message::user("Hello")]))
//!     .await?;
//! ```

pub mod litellm;

pub use litellm::{
    Choice, FunctionCall, FunctionDefinition, GenerationRequest, GenerationResponse,
    LiteLlmClient, LlmProvider, Message, ToolCallInfo, ToolDefinition, Usage,
};
