//! OpenAI-compatible provider implementation.

pub mod client;

pub use client::OpenAiCompatibleClient;
