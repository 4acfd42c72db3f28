//! Output validation, formatting and optimisation of a generated draft into a [`Post`].

use chrono::Utc;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::rag::RagOutput;
use crate::errors::{PipelineError, PipelineResult};
use crate::models::{Post, PostContent, PostMetadata, SourceRef, Tone};

pub const WORDS_PER_MINUTE: usize = 200;
pub const MAX_SUMMARY_CHARS: usize = 160;

/// Reject drafts with empty sections or scores outside [0, 1]
pub fn validate_output(output: &RagOutput) -> PipelineResult<()> {
    let draft = &output.draft;
    for (field, value) in [
        ("title", &draft.title),
        ("body", &draft.body),
        ("summary", &draft.summary),
    ] {
        if value.trim().is_empty() {
            return Err(PipelineError::ContentGeneration(format!("generated {} is empty", field)));
        }
    }

    let confidence = output.verification.confidence;
    if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
        return Err(PipelineError::ContentGeneration(format!(
            "confidence {} is outside [0, 1]",
            confidence
        )));
    }

    for source in &output.sources {
        for score in [
            source.relevance_score,
            source.credibility_score,
            source.freshness_score,
            source.composite_score,
        ] {
            if !score.is_finite() || !(0.0..=1.0).contains(&score) {
                return Err(PipelineError::ContentGeneration(format!(
                    "source '{}' has score {} outside [0, 1]",
                    source.id, score
                )));
            }
        }
    }
    Ok(())
}

/// Shape a validated draft into a post, run the optimisation passes and sign it
pub fn format_post(output: RagOutput, topic: &str, tone: Tone, attempts: u32) -> PipelineResult<Post> {
    let content = optimize(PostContent {
        title: output.draft.title,
        body: output.draft.body,
        summary: output.draft.summary,
        keywords: output.draft.keywords,
    });

    let word_count = content.body.split_whitespace().count();
    let sources = output
        .sources
        .iter()
        .map(|s| SourceRef {
            id: s.id.clone(),
            strategy: s.source_strategy.clone(),
            score: s.composite_score,
        })
        .collect();

    let metadata = PostMetadata {
        id: Uuid::new_v4(),
        topic: topic.to_string(),
        tone,
        word_count,
        reading_time_minutes: reading_time_minutes(word_count),
        sources,
        confidence: output.verification.confidence,
        verification: output.verification,
        generated_at: Utc::now(),
        attempts,
        used_fallback: output.used_fallback,
    };

    let signature = sign(&content)?;
    Ok(Post {
        content,
        metadata,
        signature,
    })
}

pub fn reading_time_minutes(word_count: usize) -> u32 {
    word_count.div_ceil(WORDS_PER_MINUTE).max(1) as u32
}

/// Hex SHA-256 of the serialized content
pub fn sign(content: &PostContent) -> PipelineResult<String> {
    let bytes = serde_json::to_vec(content)
        .map_err(|e| PipelineError::Unexpected(format!("failed to serialize post content: {}", e)))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

// ============================================================================
// Optimisation passes
// ============================================================================

fn optimize(content: PostContent) -> PostContent {
    PostContent {
        title: collapse_spaces(&content.title),
        body: normalize_body(&content.body),
        summary: truncate_on_word(&collapse_spaces(&content.summary), MAX_SUMMARY_CHARS),
        keywords: dedupe_keywords(content.keywords),
    }
}

fn collapse_spaces(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Trim each line, collapse inner runs of spaces and keep at most one blank line
fn normalize_body(body: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    for line in body.lines() {
        let line = collapse_spaces(line);
        if line.is_empty() && out.last().map_or(true, |prev| prev.is_empty()) {
            continue;
        }
        out.push(line);
    }
    while out.last().map_or(false, |l| l.is_empty()) {
        out.pop();
    }
    out.join("\n")
}

fn dedupe_keywords(keywords: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    keywords
        .into_iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty() && seen.insert(k.to_lowercase()))
        .collect()
}

/// Cut to at most `max` characters on a word boundary, marking the cut with "..."
pub fn truncate_on_word(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }

    let budget = max.saturating_sub(3);
    let mut out = String::new();
    for word in text.split_whitespace() {
        let extra = if out.is_empty() { 0 } else { 1 };
        if out.chars().count() + extra + word.chars().count() > budget {
            break;
        }
        if extra == 1 {
            out.push(' ');
        }
        out.push_str(word);
    }
    if out.is_empty() {
        out = text.chars().take(budget).collect();
    }
    let out = out.trim_end_matches(|c: char| c.is_ascii_punctuation()).to_string();
    format!("{}...", out)
}
