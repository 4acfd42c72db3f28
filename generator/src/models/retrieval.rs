use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::post::Tone;

pub type Metadata = serde_json::Map<String, Value>;

pub const META_CONTENT: &str = "content";
pub const META_SOURCE_TYPE: &str = "source_type";
pub const META_PUBLISHED_AT: &str = "published_at";
pub const META_TITLE: &str = "title";

/// A reference document in the retrieval corpus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub content: String,
    #[serde(default)]
    pub source_type: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            content: content.into(),
            source_type: None,
            published_at: None,
            metadata: Metadata::new(),
        }
    }

    pub fn with_source_type(mut self, source_type: impl Into<String>) -> Self {
        self.source_type = Some(source_type.into());
        self
    }

    pub fn with_published_at(mut self, at: DateTime<Utc>) -> Self {
        self.published_at = Some(at);
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Flatten into the metadata stored alongside index records
    pub fn to_metadata(&self) -> Metadata {
        let mut meta = self.metadata.clone();
        meta.insert(META_CONTENT.to_string(), Value::String(self.content.clone()));
        if let Some(title) = &self.title {
            meta.insert(META_TITLE.to_string(), Value::String(title.clone()));
        }
        if let Some(source_type) = &self.source_type {
            meta.insert(META_SOURCE_TYPE.to_string(), Value::String(source_type.clone()));
        }
        if let Some(at) = self.published_at {
            meta.insert(META_PUBLISHED_AT.to_string(), Value::from(at.timestamp_millis()));
        }
        meta
    }
}

/// What the retrieval strategies search for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalQuery {
    pub topic: String,
    pub tone: Tone,
    pub user_context: Option<String>,
    /// Candidates each strategy may return
    pub limit: usize,
    pub threshold: f32,
}

impl RetrievalQuery {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            tone: Tone::default(),
            user_context: None,
            limit: 20,
            threshold: 0.0,
        }
    }

    /// Text used for embedding and keyword matching
    pub fn search_text(&self) -> String {
        match &self.user_context {
            Some(ctx) if !ctx.is_empty() => format!("{} {}", self.topic, ctx),
            _ => self.topic.clone(),
        }
    }
}

/// One candidate document returned by a retrieval strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub id: String,
    pub source_strategy: String,
    pub content: String,
    pub relevance_score: f64,
    pub credibility_score: f64,
    pub freshness_score: f64,
    #[serde(default)]
    pub composite_score: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl RetrievalResult {
    /// Build from index metadata; `relevance` is clamped into [0, 1]
    pub fn from_metadata(id: &str, strategy: &str, relevance: f64, metadata: &Metadata) -> Self {
        let content = metadata
            .get(META_CONTENT)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let timestamp = metadata
            .get(META_PUBLISHED_AT)
            .and_then(Value::as_i64)
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now);

        Self {
            id: id.to_string(),
            source_strategy: strategy.to_string(),
            content,
            relevance_score: clamp_unit(relevance),
            credibility_score: 0.0,
            freshness_score: 0.0,
            composite_score: 0.0,
            timestamp,
            metadata: metadata.clone(),
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.metadata.get(META_TITLE).and_then(Value::as_str)
    }

    pub fn source_type(&self) -> Option<&str> {
        self.metadata.get(META_SOURCE_TYPE).and_then(Value::as_str)
    }
}

pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Stages of one retrieval-augmented generation call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RagStage {
    Validating,
    Retrieving,
    Merging,
    Generating,
    Verifying,
    Enhancing,
    Fallback,
    Done,
}

/// Generated text before formatting into a post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub title: String,
    pub body: String,
    pub summary: String,
    pub keywords: Vec<String>,
    /// Name of the generator that produced it
    pub generator: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub text: String,
    pub verified: bool,
    pub supporting_source: Option<String>,
    /// Share of the claim's content tokens found in the best source
    pub support: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct VerificationReport {
    pub claims: Vec<Claim>,
    pub verified: usize,
    pub flagged: usize,
    pub confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_metadata_round_trip() {
        let published = Utc.timestamp_millis_opt(1_700_000_000_000).single().unwrap();
        let doc = Document::new("doc-1", "Rust is a systems language.")
            .with_source_type("reference")
            .with_published_at(published)
            .with_meta("credibility", json!(0.9));

        let result = RetrievalResult::from_metadata("doc-1", "semantic", 1.7, &doc.to_metadata());

        assert_eq!(result.content, "Rust is a systems language.");
        assert_eq!(result.relevance_score, 1.0);
        assert_eq!(result.timestamp, published);
        assert_eq!(result.source_type(), Some("reference"));
        assert_eq!(result.metadata["credibility"], json!(0.9));
    }

    #[test]
    fn test_search_text_includes_context() {
        let mut query = RetrievalQuery::new("tokio");
        assert_eq!(query.search_text(), "tokio");
        query.user_context = Some("for web services".into());
        assert_eq!(query.search_text(), "tokio for web services");
    }

    #[test]
    fn test_clamp_unit_handles_nan() {
        assert_eq!(clamp_unit(f64::NAN), 0.0);
        assert_eq!(clamp_unit(-0.3), 0.0);
    }
}
