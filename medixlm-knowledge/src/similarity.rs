//! Vector helpers and the relevance ordering shared by all stores.

use std::cmp::Ordering;

use crate::models::ScoredNode;

/// Encode a vector as little-endian f32 bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB produced by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero-magnitude operand.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

/// Similarity descending, then confidence descending, then newer first.
pub fn compare_relevance(a: &ScoredNode, b: &ScoredNode) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.node.confidence_score.total_cmp(&a.node.confidence_score))
        .then_with(|| b.node.created_at.cmp(&a.node.created_at))
}

/// Sort by [`compare_relevance`] and keep the top `limit`.
pub fn rank(mut scored: Vec<ScoredNode>, limit: usize) -> Vec<ScoredNode> {
    scored.sort_by(compare_relevance);
    scored.truncate(limit);
    scored
}
