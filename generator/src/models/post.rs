use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use super::retrieval::VerificationReport;

pub const MIN_TOPIC_CHARS: usize = 3;
pub const MAX_TOPIC_CHARS: usize = 200;
pub const MIN_LENGTH_WORDS: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Formal,
    Casual,
    #[default]
    Professional,
    Friendly,
}

impl Tone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tone::Formal => "formal",
            Tone::Casual => "casual",
            Tone::Professional => "professional",
            Tone::Friendly => "friendly",
        }
    }
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tone {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "formal" => Ok(Tone::Formal),
            "casual" => Ok(Tone::Casual),
            "professional" => Ok(Tone::Professional),
            "friendly" => Ok(Tone::Friendly),
            other => Err(format!("unknown tone '{}'", other)),
        }
    }
}

fn default_length() -> u32 {
    800
}

/// Options of a generation request; field order is the canonical serialisation order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct GenerationOptions {
    #[serde(default)]
    pub tone: Tone,

    /// Target length in words
    #[serde(default = "default_length")]
    #[validate(range(min = 100, max = 20000))]
    pub length: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 2000))]
    pub user_context: Option<String>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            tone: Tone::default(),
            length: default_length(),
            user_context: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct GenerationRequest {
    #[validate(custom(function = "validate_topic"))]
    pub topic: String,

    #[serde(default)]
    #[validate(nested)]
    pub options: GenerationOptions,
}

fn validate_topic(topic: &str) -> Result<(), ValidationError> {
    let chars = topic.trim().chars().count();
    if (MIN_TOPIC_CHARS..=MAX_TOPIC_CHARS).contains(&chars) {
        Ok(())
    } else {
        let mut err = ValidationError::new("topic_length");
        err.message = Some(
            format!(
                "topic must be {}-{} characters, got {}",
                MIN_TOPIC_CHARS, MAX_TOPIC_CHARS, chars
            )
            .into(),
        );
        Err(err)
    }
}

impl GenerationRequest {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            options: GenerationOptions::default(),
        }
    }

    pub fn with_tone(mut self, tone: Tone) -> Self {
        self.options.tone = tone;
        self
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.options.length = length;
        self
    }

    pub fn with_user_context(mut self, context: impl Into<String>) -> Self {
        self.options.user_context = Some(context.into());
        self
    }

    /// Copy with surrounding whitespace removed from free-text fields
    pub fn normalized(&self) -> Self {
        Self {
            topic: self.topic.trim().to_string(),
            options: GenerationOptions {
                user_context: self
                    .options
                    .user_context
                    .as_ref()
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty()),
                ..self.options.clone()
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostContent {
    pub title: String,
    pub body: String,
    pub summary: String,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub id: String,
    pub strategy: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostMetadata {
    pub id: Uuid,
    pub topic: String,
    pub tone: Tone,
    pub word_count: usize,
    pub reading_time_minutes: u32,
    pub sources: Vec<SourceRef>,
    pub confidence: f64,
    pub verification: VerificationReport,
    pub generated_at: DateTime<Utc>,
    pub attempts: u32,
    pub used_fallback: bool,
}

/// A validated, formatted post; immutable once cached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub content: PostContent,
    pub metadata: PostMetadata,
    /// Hex SHA-256 of the serialized content
    pub signature: String,
}
