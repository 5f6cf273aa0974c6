//! # regask-llm
//!
//! Language-model transport for RegAsk.
//!
//! Implements `regask_core::LanguageModel` over any OpenAI-compatible chat
//! API. Kept out of `regask-core` so the pipeline has no HTTP dependency
//! and tests can script model behavior.

pub mod client;

pub use client::OpenAiChatModel;
