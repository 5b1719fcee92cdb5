//! Score fusion for the two retrieval branches.

use std::collections::HashMap;

/// How vector and lexical rankings are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionMethod {
    /// Reciprocal rank fusion: sum of 1/(k + rank) over the branches that
    /// returned the chunk. Rank-based, so branch score scales never matter.
    Rrf,
    /// Min-max normalize each branch to [0, 1], then blend with alpha on
    /// the vector side and 1 - alpha on the lexical side.
    MinMax,
}

impl FusionMethod {
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "" | "rrf" => FusionMethod::Rrf,
            "minmax" | "min-max" => FusionMethod::MinMax,
            other => {
                tracing::warn!("Unknown fusion method '{}', falling back to rrf", other);
                FusionMethod::Rrf
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FusionMethod::Rrf => "rrf",
            FusionMethod::MinMax => "minmax",
        }
    }
}

/// Fused score plus the per-branch raw scores for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedScore {
    pub fused: f32,
    pub vector_score: Option<f32>,
    pub bm25_score: Option<f32>,
}

/// Combine the two ranked candidate lists. Input order is the branch
/// ranking (best first); output is sorted by fused score descending, with
/// ties broken by vector score then id so results are reproducible.
pub fn fuse(
    method: FusionMethod,
    vector: &[(String, f32)],
    lexical: &[(String, f32)],
    rrf_k: f32,
    alpha: f32,
) -> Vec<(String, FusedScore)> {
    let fused = match method {
        FusionMethod::Rrf => rrf_fuse(vector, lexical, rrf_k),
        FusionMethod::MinMax => minmax_fuse(vector, lexical, alpha),
    };

    let mut ranked: Vec<(String, FusedScore)> = fused.into_iter().collect();
    ranked.sort_by(|a, b| {
        b.1.fused
            .partial_cmp(&a.1.fused)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let av = a.1.vector_score.unwrap_or(0.0);
                let bv = b.1.vector_score.unwrap_or(0.0);
                bv.partial_cmp(&av).unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.0.cmp(&b.0))
    });
    ranked
}

fn rrf_fuse(
    vector: &[(String, f32)],
    lexical: &[(String, f32)],
    k: f32,
) -> HashMap<String, FusedScore> {
    let mut out: HashMap<String, FusedScore> = HashMap::new();

    for (rank, (id, score)) in vector.iter().enumerate() {
        let entry = out.entry(id.clone()).or_insert(FusedScore {
            fused: 0.0,
            vector_score: None,
            bm25_score: None,
        });
        entry.fused += 1.0 / (k + (rank + 1) as f32);
        entry.vector_score = Some(*score);
    }

    for (rank, (id, score)) in lexical.iter().enumerate() {
        let entry = out.entry(id.clone()).or_insert(FusedScore {
            fused: 0.0,
            vector_score: None,
            bm25_score: None,
        });
        entry.fused += 1.0 / (k + (rank + 1) as f32);
        entry.bm25_score = Some(*score);
    }

    out
}

fn minmax_fuse(
    vector: &[(String, f32)],
    lexical: &[(String, f32)],
    alpha: f32,
) -> HashMap<String, FusedScore> {
    let vector_norm = minmax_norm(vector);
    let lexical_norm = minmax_norm(lexical);

    let vector_raw: HashMap<&str, f32> = vector.iter().map(|(id, s)| (id.as_str(), *s)).collect();
    let lexical_raw: HashMap<&str, f32> = lexical.iter().map(|(id, s)| (id.as_str(), *s)).collect();

    let mut out: HashMap<String, FusedScore> = HashMap::new();
    for id in vector_raw.keys().chain(lexical_raw.keys()) {
        if out.contains_key(*id) {
            continue;
        }
        let v = vector_norm.get(*id).copied().unwrap_or(0.0);
        let l = lexical_norm.get(*id).copied().unwrap_or(0.0);
        out.insert(
            id.to_string(),
            FusedScore {
                fused: alpha * v + (1.0 - alpha) * l,
                vector_score: vector_raw.get(*id).copied(),
                bm25_score: lexical_raw.get(*id).copied(),
            },
        );
    }
    out
}

/// Scale scores into [0, 1]. A degenerate branch where every score is equal
/// normalizes to all zeros rather than dividing by zero.
fn minmax_norm(scores: &[(String, f32)]) -> HashMap<String, f32> {
    if scores.is_empty() {
        return HashMap::new();
    }

    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for (_, s) in scores {
        min = min.min(*s);
        max = max.max(*s);
    }

    if max <= min {
        return scores.iter().map(|(id, _)| (id.clone(), 0.0)).collect();
    }

    scores
        .iter()
        .map(|(id, s)| (id.clone(), (s - min) / (max - min)))
        .collect()
}
