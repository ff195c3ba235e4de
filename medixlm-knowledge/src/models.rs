use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::KnowledgeError;

/// Open, loosely-typed properties attached to nodes and relationships.
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// Closed set of knowledge node types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeType {
    Disease,
    Symptom,
    Treatment,
    Medication,
    Procedure,
    Anatomy,
    Test,
}

impl KnowledgeType {
    pub const ALL: [KnowledgeType; 7] = [
        Self::Disease,
        Self::Symptom,
        Self::Treatment,
        Self::Medication,
        Self::Procedure,
        Self::Anatomy,
        Self::Test,
    ];

    /// Database string representation of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disease => "disease",
            Self::Symptom => "symptom",
            Self::Treatment => "treatment",
            Self::Medication => "medication",
            Self::Procedure => "procedure",
            Self::Anatomy => "anatomy",
            Self::Test => "test",
        }
    }
}

impl FromStr for KnowledgeType {
    type Err = KnowledgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| KnowledgeError::InvalidKnowledgeType(s.to_string()))
    }
}

impl std::fmt::Display for KnowledgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relationship taxonomy. Only these values ever reach a store query.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    HasSymptom,
    Treats,
    Causes,
    DiagnosedBy,
    Prevents,
    ContraindicatedWith,
    InteractsWith,
    SideEffectOf,
    LocatedIn,
    RiskFactorFor,
    ComplicationOf,
    RelatedTo,
}

impl RelationshipType {
    pub const ALL: [RelationshipType; 12] = [
        Self::HasSymptom,
        Self::Treats,
        Self::Causes,
        Self::DiagnosedBy,
        Self::Prevents,
        Self::ContraindicatedWith,
        Self::InteractsWith,
        Self::SideEffectOf,
        Self::LocatedIn,
        Self::RiskFactorFor,
        Self::ComplicationOf,
        Self::RelatedTo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HasSymptom => "HAS_SYMPTOM",
            Self::Treats => "TREATS",
            Self::Causes => "CAUSES",
            Self::DiagnosedBy => "DIAGNOSED_BY",
            Self::Prevents => "PREVENTS",
            Self::ContraindicatedWith => "CONTRAINDICATED_WITH",
            Self::InteractsWith => "INTERACTS_WITH",
            Self::SideEffectOf => "SIDE_EFFECT_OF",
            Self::LocatedIn => "LOCATED_IN",
            Self::RiskFactorFor => "RISK_FACTOR_FOR",
            Self::ComplicationOf => "COMPLICATION_OF",
            Self::RelatedTo => "RELATED_TO",
        }
    }
}

impl FromStr for RelationshipType {
    type Err = KnowledgeError;

    /// Accepts any casing with spaces or hyphens as separators
    /// (`"has symptom"`, `"has-symptom"`, `"HAS_SYMPTOM"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .map(|c| match c {
                ' ' | '-' => '_',
                other => other.to_ascii_uppercase(),
            })
            .collect();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| KnowledgeError::InvalidRelationshipType(s.to_string()))
    }
}

impl std::fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed entity in the knowledge graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeNode {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: KnowledgeType,
    pub description: Option<String>,
    #[serde(default)]
    pub properties: Properties,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    pub confidence_score: f32,
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeNode {
    /// Text the node's embedding is computed from.
    pub fn embedding_text(&self) -> String {
        embedding_text(&self.name, self.description.as_deref())
    }
}

pub(crate) fn embedding_text(name: &str, description: Option<&str>) -> String {
    format!("{}. {}", name, description.unwrap_or_default())
        .trim()
        .to_string()
}

/// Input for creating a knowledge node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewKnowledgeNode {
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: KnowledgeType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub source: Option<String>,
    /// Defaults to 1.0
    #[serde(default)]
    pub confidence_score: Option<f32>,
}

impl NewKnowledgeNode {
    pub fn new(name: impl Into<String>, node_type: KnowledgeType) -> Self {
        Self {
            name: name.into(),
            node_type,
            description: None,
            properties: Properties::new(),
            source: None,
            confidence_score: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Validate and stamp identity/timestamps; the embedding is attached by the caller.
    pub fn into_node(self, embedding: Option<Vec<f32>>) -> Result<KnowledgeNode, KnowledgeError> {
        if self.name.trim().is_empty() {
            return Err(KnowledgeError::MissingField("name"));
        }
        let confidence_score = self.confidence_score.unwrap_or(1.0);
        validate_confidence(confidence_score)?;

        let now = Utc::now();
        Ok(KnowledgeNode {
            id: format!("kn_{}", Uuid::new_v4()),
            name: self.name.trim().to_string(),
            node_type: self.node_type,
            description: self.description,
            properties: self.properties,
            embedding,
            confidence_score,
            source: self.source,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Partial update of a node's mutable fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub properties: Option<Properties>,
    pub source: Option<String>,
    pub confidence_score: Option<f32>,
}

impl KnowledgeUpdate {
    /// Whether the update changes the text the embedding is derived from.
    pub fn touches_embedding_text(&self) -> bool {
        self.name.is_some() || self.description.is_some()
    }
}

pub(crate) fn validate_confidence(score: f32) -> Result<(), KnowledgeError> {
    if (0.0..=1.0).contains(&score) {
        Ok(())
    } else {
        Err(KnowledgeError::InvalidConfidence(score))
    }
}

/// Directed, typed edge between two existing nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Relationship {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub relationship_type: RelationshipType,
    #[serde(default)]
    pub properties: Properties,
    pub created_at: DateTime<Utc>,
}

impl Relationship {
    pub(crate) fn new(
        source_id: &str,
        target_id: &str,
        relationship_type: RelationshipType,
        properties: Properties,
    ) -> Self {
        Self {
            id: format!("rel_{}", Uuid::new_v4()),
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            relationship_type,
            properties,
            created_at: Utc::now(),
        }
    }
}

/// A node paired with its cosine similarity to a query vector.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ScoredNode {
    pub node: KnowledgeNode,
    pub score: f32,
}

/// Compact view of a node as surfaced in chat responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: KnowledgeType,
    pub description: Option<String>,
}

impl From<&KnowledgeNode> for KnowledgeSummary {
    fn from(node: &KnowledgeNode) -> Self {
        Self {
            name: node.name.clone(),
            node_type: node.node_type,
            description: node.description.clone(),
        }
    }
}
