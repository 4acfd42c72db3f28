//! Composite ranking of merged retrieval results.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use postgen_config::RetrievalSettings;
use serde_json::Value;

use crate::models::{clamp_unit, RetrievalResult};

const DAY_MS: f64 = 86_400_000.0;

/// Deterministic, pluggable credibility/freshness model
pub trait ScoreModel: Send + Sync {
    fn credibility(&self, result: &RetrievalResult) -> f64;
    fn freshness(&self, result: &RetrievalResult, now: DateTime<Utc>) -> f64;
}

/// Weights of the composite score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    pub relevance: f64,
    pub credibility: f64,
    pub freshness: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            relevance: 0.5,
            credibility: 0.3,
            freshness: 0.2,
        }
    }
}

impl From<&RetrievalSettings> for ScoreWeights {
    fn from(settings: &RetrievalSettings) -> Self {
        Self {
            relevance: settings.relevance_weight as f64,
            credibility: settings.credibility_weight as f64,
            freshness: settings.freshness_weight as f64,
        }
    }
}

impl ScoreWeights {
    pub fn composite(&self, result: &RetrievalResult) -> f64 {
        self.relevance * result.relevance_score
            + self.credibility * result.credibility_score
            + self.freshness * result.freshness_score
    }
}

/// Credibility from an explicit `credibility` metadata value or the source type,
/// freshness from exponential decay of the document age
#[derive(Debug, Clone)]
pub struct DefaultScoreModel {
    pub half_life_days: f64,
    pub default_credibility: f64,
    source_credibility: HashMap<String, f64>,
}

impl Default for DefaultScoreModel {
    fn default() -> Self {
        let source_credibility = [
            ("academic", 0.9),
            ("reference", 0.85),
            ("government", 0.85),
            ("news", 0.75),
            ("documentation", 0.8),
            ("blog", 0.5),
            ("forum", 0.4),
            ("social", 0.3),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            half_life_days: 30.0,
            default_credibility: 0.6,
            source_credibility,
        }
    }
}

impl DefaultScoreModel {
    pub fn with_source_credibility(mut self, source_type: impl Into<String>, score: f64) -> Self {
        self.source_credibility.insert(source_type.into(), clamp_unit(score));
        self
    }
}

impl ScoreModel for DefaultScoreModel {
    fn credibility(&self, result: &RetrievalResult) -> f64 {
        if let Some(explicit) = result.metadata.get("credibility").and_then(Value::as_f64) {
            return clamp_unit(explicit);
        }
        result
            .source_type()
            .and_then(|t| self.source_credibility.get(&t.to_lowercase()))
            .copied()
            .unwrap_or(self.default_credibility)
    }

    fn freshness(&self, result: &RetrievalResult, now: DateTime<Utc>) -> f64 {
        let age_ms = (now - result.timestamp).num_milliseconds();
        if age_ms <= 0 {
            return 1.0;
        }
        let age_days = age_ms as f64 / DAY_MS;
        clamp_unit(0.5f64.powf(age_days / self.half_life_days.max(f64::EPSILON)))
    }
}

/// Deduplicate by `(id, source_strategy)`, score, and keep the best `top_k`.
///
/// The first occurrence of a duplicate wins; ties on the composite score keep merge order.
pub fn merge_and_rank(
    batches: Vec<Vec<RetrievalResult>>,
    model: &dyn ScoreModel,
    weights: &ScoreWeights,
    top_k: usize,
    now: DateTime<Utc>,
) -> Vec<RetrievalResult> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut merged: Vec<RetrievalResult> = batches
        .into_iter()
        .flatten()
        .filter(|r| seen.insert((r.id.clone(), r.source_strategy.clone())))
        .map(|mut r| {
            r.relevance_score = clamp_unit(r.relevance_score);
            r.credibility_score = clamp_unit(model.credibility(&r));
            r.freshness_score = clamp_unit(model.freshness(&r, now));
            r.composite_score = weights.composite(&r);
            r
        })
        .collect();

    merged.sort_by(|a, b| {
        b.composite_score
            .partial_cmp(&a.composite_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    merged.truncate(top_k);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;
    use chrono::Duration;
    use serde_json::json;

    fn result(id: &str, strategy: &str, relevance: f64, meta: Metadata) -> RetrievalResult {
        let mut r = RetrievalResult::from_metadata(id, strategy, relevance, &meta);
        r.timestamp = Utc::now();
        r
    }

    #[test]
    fn test_credibility_sources() {
        let model = DefaultScoreModel::default();

        let mut explicit = Metadata::new();
        explicit.insert("credibility".into(), json!(0.95));
        assert_eq!(model.credibility(&result("a", "s", 1.0, explicit)), 0.95);

        let mut typed = Metadata::new();
        typed.insert("source_type".into(), json!("News"));
        assert_eq!(model.credibility(&result("b", "s", 1.0, typed)), 0.75);

        assert_eq!(model.credibility(&result("c", "s", 1.0, Metadata::new())), 0.6);
    }

    #[test]
    fn test_freshness_half_life() {
        let model = DefaultScoreModel::default();
        let now = Utc::now();
        let mut r = result("a", "s", 1.0, Metadata::new());

        r.timestamp = now;
        assert_eq!(model.freshness(&r, now), 1.0);

        r.timestamp = now - Duration::days(30);
        assert!((model.freshness(&r, now) - 0.5).abs() < 1e-9);

        r.timestamp = now + Duration::days(3);
        assert_eq!(model.freshness(&r, now), 1.0);
    }

    #[test]
    fn test_merge_dedupes_by_id_and_strategy() {
        let model = DefaultScoreModel::default();
        let batches = vec![
            vec![
                result("doc", "semantic", 0.9, Metadata::new()),
                result("doc", "semantic", 0.1, Metadata::new()),
            ],
            vec![result("doc", "keyword", 0.4, Metadata::new())],
        ];

        let merged = merge_and_rank(batches, &model, &ScoreWeights::default(), 10, Utc::now());
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].source_strategy, "semantic");
        assert_eq!(merged[0].relevance_score, 0.9);
    }

    #[test]
    fn test_merge_uses_weighted_composite_and_top_k() {
        let model = DefaultScoreModel::default();
        let now = Utc::now();

        let batch: Vec<RetrievalResult> = (0..15)
            .map(|i| result(&format!("d{}", i), "keyword", i as f64 / 15.0, Metadata::new()))
            .collect();
        let merged = merge_and_rank(vec![batch], &model, &ScoreWeights::default(), 10, now);

        assert_eq!(merged.len(), 10);
        assert_eq!(merged[0].id, "d14");
        for r in &merged {
            let expected = 0.5 * r.relevance_score + 0.3 * r.credibility_score + 0.2 * r.freshness_score;
            assert!((r.composite_score - expected).abs() < 1e-12);
            assert!((0.0..=1.0).contains(&r.composite_score));
        }
        for pair in merged.windows(2) {
            assert!(pair[0].composite_score >= pair[1].composite_score);
        }
    }
}
