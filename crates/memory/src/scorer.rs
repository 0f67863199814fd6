/// Retrieval ranking.
///
/// ```text
/// final = 0.4·similarity + 0.3·min(access/100, 1) + 0.2·exp(-λ·age_ms) + 0.1·graph_density
/// ```
/// Every summand is individually clamped to [0, 1], so the blend stays in
/// [0, 1] for weights summing to one; the result is clamped anyway to hold
/// the bound under reconfigured weights.
use crate::schema::Neighborhood;

/// Access counts saturate the access component at this many reads.
const MAX_ACCESS_COUNT: f64 = 100.0;

#[derive(Debug, Clone, Copy)]
pub struct ScoreWeights {
    pub similarity: f64,
    pub access: f64,
    pub recency: f64,
    pub graph: f64,
    /// Decay constant for millisecond timestamp deltas.
    pub lambda: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            similarity: 0.4,
            access: 0.3,
            recency: 0.2,
            graph: 0.1,
            lambda: 1e-6,
        }
    }
}

/// Blend similarity, usage, recency and graph density into the final rank.
pub fn final_score(
    weights: &ScoreWeights,
    similarity: f32,
    access_count: u64,
    last_accessed_at: i64,
    now: i64,
    graph_density: f64,
) -> f64 {
    let similarity = f64::from(similarity).clamp(0.0, 1.0);
    let access = (access_count as f64 / MAX_ACCESS_COUNT).min(1.0);
    let age_ms = (now - last_accessed_at).max(0) as f64;
    let recency = (-weights.lambda * age_ms).exp().clamp(0.0, 1.0);
    let graph = graph_density.clamp(0.0, 1.0);

    let score = weights.similarity * similarity
        + weights.access * access
        + weights.recency * recency
        + weights.graph * graph;
    score.clamp(0.0, 1.0)
}

/// Scalar summary of an entity's neighborhood: how many nodes and edges
/// surround it and how strongly they are connected.
///
/// ```text
/// density = 0.4·min(N/10, 1) + 0.3·min(E/20, 1) + 0.3·min(w̄, 1)
/// ```
pub fn graph_density(neighborhood: &Neighborhood) -> f64 {
    if neighborhood.nodes.is_empty() {
        return 0.0;
    }

    let node_score = (neighborhood.nodes.len() as f64 / 10.0).min(1.0);
    let edge_score = (neighborhood.edges.len() as f64 / 20.0).min(1.0);

    let avg_weight = if neighborhood.edges.is_empty() {
        0.0
    } else {
        let total: f64 = neighborhood.edges.iter().filter_map(|e| e.weight).sum();
        total / neighborhood.edges.len() as f64
    };
    let weight_score = avg_weight.clamp(0.0, 1.0);

    0.4 * node_score + 0.3 * edge_score + 0.3 * weight_score
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{GraphEdge, GraphNode};

    fn node(name: &str) -> GraphNode {
        GraphNode {
            name: name.to_string(),
            kind: "entity".to_string(),
            entity_type: None,
            description: None,
            created_at: 0,
            last_accessed_at: None,
        }
    }

    fn edge(from: &str, to: &str, weight: f64) -> GraphEdge {
        GraphEdge {
            from_entity: from.to_string(),
            to_entity: to.to_string(),
            relation_type: "RELATED_TO".to_string(),
            weight: Some(weight),
            created_at: 0,
        }
    }

    #[test]
    fn final_score_stays_in_unit_interval() {
        let weights = ScoreWeights::default();
        let cases = [
            (0.0_f32, 0_u64, 0_i64, 0_i64, 0.0_f64),
            (1.0, 1_000_000, 0, i64::MAX / 2, 1.0),
            (5.0, 50, 100, 50, 2.0),   // over-range inputs are clamped
            (-3.0, 0, 1000, 0, -1.0),  // negatives too
        ];
        for (similarity, access, last, now, graph) in cases {
            let score = final_score(&weights, similarity, access, last, now, graph);
            assert!((0.0..=1.0).contains(&score), "score {score} out of range");
        }
    }

    #[test]
    fn fresh_identical_match_scores_near_similarity_plus_recency() {
        let weights = ScoreWeights::default();
        // similarity 1.0, zero age, no access, no graph: 0.4 + 0.2 = 0.6
        let score = final_score(&weights, 1.0, 0, 1_000, 1_000, 0.0);
        assert!((score - 0.6).abs() < 1e-9);
    }

    #[test]
    fn access_component_saturates_at_one_hundred_reads() {
        let weights = ScoreWeights::default();
        let at_cap = final_score(&weights, 0.0, 100, 0, 0, 0.0);
        let over_cap = final_score(&weights, 0.0, 100_000, 0, 0, 0.0);
        assert!((at_cap - 0.3).abs() < 1e-9);
        assert!((over_cap - at_cap).abs() < 1e-12);
    }

    #[test]
    fn recency_follows_exponential_decay() {
        let weights = ScoreWeights::default();
        let ten_min_ms: i64 = 600_000;
        let hour_ms: i64 = 3_600_000;

        let after_ten_min = final_score(&weights, 0.0, 0, 0, ten_min_ms, 0.0) / weights.recency;
        let after_hour = final_score(&weights, 0.0, 0, 0, hour_ms, 0.0) / weights.recency;

        // exp(-1e-6 · Δms): 0.5488 after 10 min, 0.0273 after an hour.
        assert!((after_ten_min - 0.5488).abs() < 1e-3, "10m decay was {after_ten_min}");
        assert!((after_hour - 0.0273).abs() < 1e-3, "1h decay was {after_hour}");
        assert!(after_ten_min > after_hour);
    }

    #[test]
    fn future_last_access_counts_as_fresh() {
        let weights = ScoreWeights::default();
        let score = final_score(&weights, 0.0, 0, 2_000, 1_000, 0.0);
        assert!((score - weights.recency).abs() < 1e-9);
    }

    #[test]
    fn empty_neighborhood_has_zero_density() {
        assert_eq!(graph_density(&Neighborhood::default()), 0.0);
    }

    #[test]
    fn density_components_blend_as_specified() {
        let neighborhood = Neighborhood {
            nodes: vec![node("a"), node("b"), node("c"), node("d"), node("e")],
            edges: vec![edge("a", "b", 0.5), edge("b", "c", 1.0)],
        };
        // nodes: 5/10 = 0.5, edges: 2/20 = 0.1, w̄ = 0.75
        let expected = 0.4 * 0.5 + 0.3 * 0.1 + 0.3 * 0.75;
        assert!((graph_density(&neighborhood) - expected).abs() < 1e-9);
    }

    #[test]
    fn density_saturates_on_dense_neighborhoods() {
        let nodes: Vec<GraphNode> = (0..30).map(|i| node(&format!("n{i}"))).collect();
        let edges: Vec<GraphEdge> = (0..40).map(|i| edge("a", "b", 2.0 + i as f64)).collect();
        let density = graph_density(&Neighborhood { nodes, edges });
        assert!((density - 1.0).abs() < 1e-9);
    }

    #[test]
    fn nodes_without_edges_still_count() {
        let neighborhood = Neighborhood {
            nodes: vec![node("a"), node("b")],
            edges: vec![],
        };
        let expected = 0.4 * 0.2;
        assert!((graph_density(&neighborhood) - expected).abs() < 1e-9);
    }
}
