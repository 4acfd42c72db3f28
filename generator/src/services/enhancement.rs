//! Best-effort post-processing passes over a verified draft.

use std::sync::Arc;

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use thiserror::Error;

use super::generation::title_case;
use crate::models::{Draft, Tone};

const MAX_KEYWORDS: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct EnhancementContext {
    pub topic: String,
    pub tone: Tone,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnhancementError {
    #[error("Draft body is empty")]
    EmptyDraft,

    #[error("Enhancement failed: {0}")]
    Failed(String),
}

/// One independent transform; a failing transform is skipped by the caller
pub trait Enhancement: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, draft: &Draft, ctx: &EnhancementContext) -> Result<Draft, EnhancementError>;
}

/// The style, SEO and engagement passes in their usual order
pub fn default_enhancements() -> Vec<Arc<dyn Enhancement>> {
    vec![
        Arc::new(StyleTransform),
        Arc::new(SeoTransform),
        Arc::new(EngagementTransform),
    ]
}

// ============================================================================
// Style
// ============================================================================

lazy_static! {
    static ref EXPANSIONS: Vec<(Regex, &'static str)> = [
        (r"(?i)\bcan't\b", "cannot"),
        (r"(?i)\bwon't\b", "will not"),
        (r"(?i)\bdon't\b", "do not"),
        (r"(?i)\bdoesn't\b", "does not"),
        (r"(?i)\bisn't\b", "is not"),
        (r"(?i)\baren't\b", "are not"),
        (r"(?i)\bit's\b", "it is"),
        (r"(?i)\byou're\b", "you are"),
        (r"(?i)\bwe're\b", "we are"),
        (r"(?i)\blet's\b", "let us"),
    ]
    .into_iter()
    .map(|(pattern, replacement)| (Regex::new(pattern).unwrap(), replacement))
    .collect();

    static ref CONTRACTIONS: Vec<(Regex, &'static str)> = [
        (r"(?i)\bcannot\b", "can't"),
        (r"(?i)\bwill not\b", "won't"),
        (r"(?i)\bdo not\b", "don't"),
        (r"(?i)\bdoes not\b", "doesn't"),
        (r"(?i)\bis not\b", "isn't"),
        (r"(?i)\bare not\b", "aren't"),
        (r"(?i)\bit is\b", "it's"),
        (r"(?i)\byou are\b", "you're"),
        (r"(?i)\bwe are\b", "we're"),
    ]
    .into_iter()
    .map(|(pattern, replacement)| (Regex::new(pattern).unwrap(), replacement))
    .collect();
}

fn replace_keeping_case(text: &str, rules: &[(Regex, &'static str)]) -> String {
    rules.iter().fold(text.to_string(), |acc, (pattern, replacement)| {
        pattern
            .replace_all(&acc, |caps: &Captures| {
                let capitalized = caps[0].chars().next().map_or(false, char::is_uppercase);
                if capitalized {
                    title_case_first(replacement)
                } else {
                    replacement.to_string()
                }
            })
            .into_owned()
    })
}

fn title_case_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Expands contractions for formal tones and contracts for casual ones
#[derive(Debug, Clone, Copy, Default)]
pub struct StyleTransform;

impl Enhancement for StyleTransform {
    fn name(&self) -> &str {
        "style"
    }

    fn apply(&self, draft: &Draft, ctx: &EnhancementContext) -> Result<Draft, EnhancementError> {
        let rules: &[(Regex, &'static str)] = match ctx.tone {
            Tone::Formal | Tone::Professional => EXPANSIONS.as_slice(),
            Tone::Casual | Tone::Friendly => CONTRACTIONS.as_slice(),
        };

        Ok(Draft {
            body: replace_keeping_case(&draft.body, rules),
            summary: replace_keeping_case(&draft.summary, rules),
            ..draft.clone()
        })
    }
}

// ============================================================================
// SEO
// ============================================================================

/// Makes sure the topic appears in the title, summary and keywords
#[derive(Debug, Clone, Copy, Default)]
pub struct SeoTransform;

impl Enhancement for SeoTransform {
    fn name(&self) -> &str {
        "seo"
    }

    fn apply(&self, draft: &Draft, ctx: &EnhancementContext) -> Result<Draft, EnhancementError> {
        let topic = ctx.topic.trim();
        if topic.is_empty() {
            return Err(EnhancementError::Failed("no topic to optimise for".to_string()));
        }
        let topic_lower = topic.to_lowercase();

        let title = if draft.title.to_lowercase().contains(&topic_lower) {
            draft.title.clone()
        } else {
            format!("{}: {}", title_case(topic), draft.title)
        };

        let summary = if draft.summary.to_lowercase().contains(&topic_lower) {
            draft.summary.clone()
        } else {
            format!("{}: {}", title_case(topic), draft.summary)
        };

        let mut keywords = vec![topic_lower];
        for keyword in &draft.keywords {
            let keyword = keyword.trim().to_lowercase();
            if !keyword.is_empty() && !keywords.contains(&keyword) {
                keywords.push(keyword);
            }
        }
        keywords.truncate(MAX_KEYWORDS);

        Ok(Draft {
            title,
            summary,
            keywords,
            ..draft.clone()
        })
    }
}

// ============================================================================
// Engagement
// ============================================================================

/// Appends a tone-specific closing line, once
#[derive(Debug, Clone, Copy, Default)]
pub struct EngagementTransform;

impl EngagementTransform {
    pub fn closing_line(tone: Tone) -> &'static str {
        match tone {
            Tone::Formal => "Readers are encouraged to consult the sources above for further detail.",
            Tone::Casual => "Got thoughts? Drop them in the comments!",
            Tone::Professional => "Consider how these points apply to your own work.",
            Tone::Friendly => "Thanks for reading, and happy exploring!",
        }
    }
}

impl Enhancement for EngagementTransform {
    fn name(&self) -> &str {
        "engagement"
    }

    fn apply(&self, draft: &Draft, ctx: &EnhancementContext) -> Result<Draft, EnhancementError> {
        let body = draft.body.trim_end();
        if body.is_empty() {
            return Err(EnhancementError::EmptyDraft);
        }

        let closing = Self::closing_line(ctx.tone);
        if body.ends_with(closing) {
            return Ok(draft.clone());
        }

        Ok(Draft {
            body: format!("{}\n\n{}", body, closing),
            ..draft.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(body: &str) -> Draft {
        Draft {
            title: "Getting Started".into(),
            body: body.into(),
            summary: "It's easy once you don't overthink it.".into(),
            keywords: vec!["Tokio".into(), "runtime".into(), "tokio".into()],
            generator: "template".into(),
        }
    }

    fn ctx(tone: Tone) -> EnhancementContext {
        EnhancementContext {
            topic: "tokio".into(),
            tone,
        }
    }

    #[test]
    fn test_style_expands_for_formal() {
        let out = StyleTransform
            .apply(&draft("Don't block. It's a runtime, you can't sleep here."), &ctx(Tone::Formal))
            .unwrap();
        assert_eq!(out.body, "Do not block. It is a runtime, you cannot sleep here.");
        assert_eq!(out.summary, "It is easy once you do not overthink it.");
        assert_eq!(out.title, "Getting Started");
    }

    #[test]
    fn test_style_contracts_for_casual() {
        let out = StyleTransform
            .apply(&draft("It is fast and you do not need threads."), &ctx(Tone::Casual))
            .unwrap();
        assert_eq!(out.body, "It's fast and you don't need threads.");
    }

    #[test]
    fn test_seo_adds_topic_everywhere() {
        let out = SeoTransform.apply(&draft("Body."), &ctx(Tone::Professional)).unwrap();
        assert_eq!(out.title, "Tokio: Getting Started");
        assert!(out.summary.starts_with("Tokio: "));
        assert_eq!(out.keywords, vec!["tokio", "runtime"]);
    }

    #[test]
    fn test_seo_caps_keywords() {
        let mut many = draft("Body.");
        many.keywords = (0..20).map(|i| format!("k{}", i)).collect();
        let out = SeoTransform.apply(&many, &ctx(Tone::Formal)).unwrap();
        assert_eq!(out.keywords.len(), MAX_KEYWORDS);
        assert_eq!(out.keywords[0], "tokio");
    }

    #[test]
    fn test_engagement_is_idempotent() {
        let once = EngagementTransform.apply(&draft("Body."), &ctx(Tone::Friendly)).unwrap();
        let twice = EngagementTransform.apply(&once, &ctx(Tone::Friendly)).unwrap();
        assert!(once.body.ends_with("Thanks for reading, and happy exploring!"));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_engagement_rejects_empty_body() {
        let err = EngagementTransform.apply(&draft("   "), &ctx(Tone::Casual)).unwrap_err();
        assert_eq!(err, EnhancementError::EmptyDraft);
    }
}
