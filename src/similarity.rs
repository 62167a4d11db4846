// src/similarity.rs

//! Cosine ranking over candidate records. Pure and read-only: ranking never
//! mutates access or decay fields — any access bump on retrieved results is
//! the facade's responsibility.

use crate::types::{MemoryRecord, ScoredRecord};

/// Cosine similarity between two vectors. Mismatched dimensions or a zero
/// norm score 0.0 rather than erroring.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// Rank candidates against a query vector. Candidates without an embedding
/// are excluded; survivors are filtered at `threshold`, sorted descending by
/// similarity with more recent `last_accessed_at` breaking ties, and
/// truncated to `limit`.
pub fn rank(
    query: &[f32],
    candidates: Vec<MemoryRecord>,
    threshold: f32,
    limit: usize,
) -> Vec<ScoredRecord> {
    let mut scored: Vec<ScoredRecord> = candidates
        .into_iter()
        .filter_map(|record| {
            let embedding = record.embedding.as_ref()?;
            let similarity = cosine_similarity(query, embedding);
            if similarity >= threshold {
                Some(ScoredRecord { record, similarity })
            } else {
                None
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.record.last_accessed_at.cmp(&a.record.last_accessed_at))
    });
    scored.truncate(limit);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MemoryStatus;
    use chrono::{Duration, Utc};

    fn record_with_embedding(id: &str, embedding: Option<Vec<f32>>, accessed_offset_secs: i64) -> MemoryRecord {
        let now = Utc::now();
        MemoryRecord {
            id: id.to_string(),
            content: String::new(),
            content_hash: String::new(),
            kind: "fact".to_string(),
            tags: Vec::new(),
            source: String::new(),
            confidence: 0.5,
            user_context: None,
            embedding,
            access_count: 1,
            decay_score: 1.0,
            status: MemoryStatus::Active,
            cluster_id: None,
            is_compressed: false,
            created_at: now,
            updated_at: now,
            last_accessed_at: now + Duration::seconds(accessed_offset_secs),
        }
    }

    #[test]
    fn test_cosine_identity_and_orthogonality() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_rank_filters_and_sorts() {
        let candidates = vec![
            record_with_embedding("far", Some(vec![0.0, 1.0]), 0),
            record_with_embedding("near", Some(vec![1.0, 0.05]), 0),
            record_with_embedding("exact", Some(vec![1.0, 0.0]), 0),
            record_with_embedding("no-vector", None, 0),
        ];

        let ranked = rank(&[1.0, 0.0], candidates, 0.5, 10);
        let ids: Vec<&str> = ranked.iter().map(|s| s.record.id.as_str()).collect();
        assert_eq!(ids, vec!["exact", "near"]);
    }

    #[test]
    fn test_rank_recency_tiebreak_and_limit() {
        let candidates = vec![
            record_with_embedding("older", Some(vec![1.0, 0.0]), -60),
            record_with_embedding("newer", Some(vec![1.0, 0.0]), 60),
            record_with_embedding("middle", Some(vec![1.0, 0.0]), 0),
        ];

        let ranked = rank(&[1.0, 0.0], candidates, 0.0, 2);
        let ids: Vec<&str> = ranked.iter().map(|s| s.record.id.as_str()).collect();
        assert_eq!(ids, vec!["newer", "middle"]);
    }
}
