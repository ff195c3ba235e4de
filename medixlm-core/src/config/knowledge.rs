//! Knowledge system configuration types.
//!
//! These types define the resolved (non-optional) settings used by
//! `medixlm-knowledge`. They are created from the user-facing
//! `KnowledgeToolsSettings` TOML struct via `From`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::settings::KnowledgeToolsSettings;

/// Resolved knowledge settings (all values filled with defaults).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeSettings {
    #[serde(default = "default_embedding_url")]
    pub embedding_url: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// Fixed dimensionality every stored and query vector must have.
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,
    #[serde(default = "default_embedding_batch")]
    pub embedding_batch: usize,
    #[serde(default = "default_search_by_name_limit")]
    pub search_by_name_limit: usize,
    #[serde(default = "default_max_traversal_depth")]
    pub max_traversal_depth: u8,
    #[serde(default)]
    pub db_path_override: Option<PathBuf>,
}

impl Default for KnowledgeSettings {
    fn default() -> Self {
        Self {
            embedding_url: default_embedding_url(),
            embedding_model: default_embedding_model(),
            embedding_dim: default_embedding_dim(),
            embedding_batch: default_embedding_batch(),
            search_by_name_limit: default_search_by_name_limit(),
            max_traversal_depth: default_max_traversal_depth(),
            db_path_override: None,
        }
    }
}

fn default_embedding_url() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_embedding_model() -> String {
    "all-minilm".to_string()
}

fn default_embedding_dim() -> usize {
    384
}

fn default_embedding_batch() -> usize {
    32
}

fn default_search_by_name_limit() -> usize {
    20
}

fn default_max_traversal_depth() -> u8 {
    5
}

impl From<&KnowledgeToolsSettings> for KnowledgeSettings {
    fn from(value: &KnowledgeToolsSettings) -> Self {
        let mut settings = KnowledgeSettings::default();
        if let Some(url) = &value.embedding_url {
            settings.embedding_url = url.clone();
        }
        if let Some(model) = &value.embedding_model {
            settings.embedding_model = model.clone();
        }
        if let Some(dim) = value.embedding_dim {
            settings.embedding_dim = dim;
        }
        if let Some(batch) = value.embedding_batch {
            settings.embedding_batch = batch.max(1);
        }
        if let Some(limit) = value.search_by_name_limit {
            settings.search_by_name_limit = limit;
        }
        if let Some(depth) = value.max_traversal_depth {
            settings.max_traversal_depth = depth;
        }
        if let Some(path) = &value.db_path_override {
            settings.db_path_override = Some(PathBuf::from(path));
        }
        settings
    }
}
