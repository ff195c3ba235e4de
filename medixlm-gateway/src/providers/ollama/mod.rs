//! Ollama native chat API.

pub mod client;

pub use client::OllamaClient;
