// src/consolidation.rs

//! Merges near-duplicate active records within a scope. The engine builds a
//! similarity graph over the candidates it is given, extracts connected
//! components, and returns a merge plan; the service applies the plan
//! against the store. Records already carrying a `cluster_id` never reach
//! the candidate pool, which is what makes repeated runs idempotent.

use uuid::Uuid;

use crate::similarity::cosine_similarity;
use crate::types::MemoryRecord;

#[derive(Debug, Clone)]
pub struct ConsolidationConfig {
    pub enabled: bool,
    /// Edge threshold for the similarity graph.
    pub similarity_threshold: f32,
    /// Components smaller than this are discarded.
    pub min_cluster_size: usize,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            similarity_threshold: 0.85,
            min_cluster_size: 2,
        }
    }
}

/// One qualifying component: the representative keeps `active` status and
/// defines the fresh `cluster_id`; members are archived under it.
#[derive(Debug, Clone)]
pub struct ClusterPlan {
    pub cluster_id: String,
    pub representative_id: String,
    pub member_ids: Vec<String>,
}

/// Plan clusters over the candidate set. Candidates must already be active,
/// embedded, and unclustered; the store scan enforces that. Candidates
/// without an embedding are skipped defensively.
pub fn plan_clusters(candidates: &[MemoryRecord], config: &ConsolidationConfig) -> Vec<ClusterPlan> {
    let embedded: Vec<&MemoryRecord> = candidates
        .iter()
        .filter(|r| r.embedding.is_some() && r.cluster_id.is_none())
        .collect();

    if embedded.len() < config.min_cluster_size.max(2) {
        return Vec::new();
    }

    // Union-find over pairwise similarity edges.
    let mut parent: Vec<usize> = (0..embedded.len()).collect();
    for i in 0..embedded.len() {
        for j in (i + 1)..embedded.len() {
            let a = embedded[i].embedding.as_deref().unwrap_or(&[]);
            let b = embedded[j].embedding.as_deref().unwrap_or(&[]);
            if cosine_similarity(a, b) >= config.similarity_threshold {
                union(&mut parent, i, j);
            }
        }
    }

    let mut components: std::collections::HashMap<usize, Vec<usize>> =
        std::collections::HashMap::new();
    for i in 0..embedded.len() {
        let root = find(&mut parent, i);
        components.entry(root).or_default().push(i);
    }

    let mut plans: Vec<ClusterPlan> = components
        .into_values()
        .filter(|members| members.len() >= config.min_cluster_size)
        .map(|members| {
            let representative = select_representative(&members, &embedded);
            ClusterPlan {
                cluster_id: Uuid::new_v4().to_string(),
                representative_id: embedded[representative].id.clone(),
                member_ids: members
                    .into_iter()
                    .filter(|&m| m != representative)
                    .map(|m| embedded[m].id.clone())
                    .collect(),
            }
        })
        .collect();

    // Deterministic apply order for tests and logs.
    plans.sort_by(|a, b| a.representative_id.cmp(&b.representative_id));
    plans
}

/// Highest-confidence member wins; ties go to the most recent `updated_at`,
/// then to id ordering for full determinism.
fn select_representative(members: &[usize], embedded: &[&MemoryRecord]) -> usize {
    let mut best = members[0];
    for &candidate in &members[1..] {
        let current = embedded[best];
        let challenger = embedded[candidate];
        let ordering = challenger
            .confidence
            .partial_cmp(&current.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| challenger.updated_at.cmp(&current.updated_at))
            .then_with(|| current.id.cmp(&challenger.id));
        if ordering == std::cmp::Ordering::Greater {
            best = candidate;
        }
    }
    best
}

fn find(parent: &mut [usize], i: usize) -> usize {
    let mut root = i;
    while parent[root] != root {
        root = parent[root];
    }
    // Path compression.
    let mut cursor = i;
    while parent[cursor] != root {
        let next = parent[cursor];
        parent[cursor] = root;
        cursor = next;
    }
    root
}

fn union(parent: &mut [usize], a: usize, b: usize) {
    let ra = find(parent, a);
    let rb = find(parent, b);
    if ra != rb {
        parent[rb] = ra;
    }
}
