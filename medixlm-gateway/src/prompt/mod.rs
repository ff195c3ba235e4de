//! Prompt text for the medical assistant.

pub mod base;

pub use base::{
    KNOWLEDGE_CLOSING, KNOWLEDGE_HEADING, NO_KNOWLEDGE_MARKER, base_system_prompt,
};
