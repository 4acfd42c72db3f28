//! Claim extraction and source-overlap verification.

use std::collections::HashSet;

use lazy_static::lazy_static;
use regex::Regex;

use super::keyword_index::tokenize;
use crate::models::{Claim, Draft, RetrievalResult, VerificationReport};

lazy_static! {
    static ref COPULA_PATTERN: Regex = Regex::new(r"(?i)\b(is|are|was|were|has|have)\b").unwrap();
}

/// Sentences of `text`, skipping markdown headings
pub fn split_sentences(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .flat_map(split_line)
        .collect()
}

// A sentence ends at `.`, `!` or `?` followed by whitespace or the end of the line,
// so decimals like "1.0" stay intact
fn split_line(line: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut push = |s: &str| {
        let s = s.trim();
        if s.chars().filter(|c| c.is_alphanumeric()).count() > 1 {
            sentences.push(s.to_string());
        }
    };

    let mut start = 0;
    let mut chars = line.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            let at_boundary = chars.peek().map_or(true, |(_, next)| next.is_whitespace());
            if at_boundary {
                let end = idx + c.len_utf8();
                push(&line[start..end]);
                start = end;
            }
        }
    }
    push(&line[start..]);

    sentences
}

/// A sentence states a checkable fact if it has a number, a proper noun or a copula
fn is_claim(sentence: &str) -> bool {
    if sentence.ends_with('?') {
        return false;
    }
    let has_digit = sentence.chars().any(|c| c.is_ascii_digit());
    let has_proper_noun = sentence
        .split_whitespace()
        .skip(1)
        .any(|w| w.chars().next().map_or(false, char::is_uppercase));

    has_digit || has_proper_noun || COPULA_PATTERN.is_match(sentence)
}

#[derive(Debug, Clone)]
pub struct ClaimVerifier {
    /// Share of a claim's content tokens that must occur in one source
    pub min_support: f64,
}

impl Default for ClaimVerifier {
    fn default() -> Self {
        Self { min_support: 0.5 }
    }
}

impl ClaimVerifier {
    pub fn extract_claims(&self, text: &str) -> Vec<String> {
        split_sentences(text)
            .into_iter()
            .filter(|s| is_claim(s))
            .filter(|s| !tokenize(s).is_empty())
            .collect()
    }

    /// Check every claim in the draft body against the retrieved sources.
    /// Unsupported claims are flagged, never removed.
    pub fn verify(&self, draft: &Draft, sources: &[RetrievalResult]) -> VerificationReport {
        let source_tokens: Vec<(&str, HashSet<String>)> = sources
            .iter()
            .map(|s| (s.id.as_str(), tokenize(&s.content).into_iter().collect()))
            .collect();

        let claims: Vec<Claim> = self
            .extract_claims(&draft.body)
            .into_iter()
            .map(|text| {
                let tokens: HashSet<String> = tokenize(&text).into_iter().collect();

                let mut best: Option<(&str, f64)> = None;
                for (id, words) in &source_tokens {
                    let matched = tokens.iter().filter(|t| words.contains(*t)).count();
                    let support = matched as f64 / tokens.len() as f64;
                    if best.map_or(true, |(_, s)| support > s) {
                        best = Some((*id, support));
                    }
                }

                let support = best.map(|(_, s)| s).unwrap_or(0.0);
                let verified = support >= self.min_support;
                Claim {
                    text,
                    verified,
                    supporting_source: best.filter(|_| verified).map(|(id, _)| id.to_string()),
                    support,
                }
            })
            .collect();

        let verified = claims.iter().filter(|c| c.verified).count();
        let flagged = claims.len() - verified;
        let confidence = if claims.is_empty() {
            1.0
        } else {
            verified as f64 / claims.len() as f64
        };

        if flagged > 0 {
            tracing::debug!("🔎 {} of {} claims flagged as unverified", flagged, claims.len());
        }

        VerificationReport {
            claims,
            verified,
            flagged,
            confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;

    fn draft(body: &str) -> Draft {
        Draft {
            title: "t".into(),
            body: body.into(),
            summary: "s".into(),
            keywords: vec![],
            generator: "test".into(),
        }
    }

    fn source(id: &str, content: &str) -> RetrievalResult {
        let mut meta = Metadata::new();
        meta.insert("content".into(), serde_json::json!(content));
        RetrievalResult::from_metadata(id, "keyword", 1.0, &meta)
    }

    #[test]
    fn test_split_sentences_skips_headings() {
        let sentences = split_sentences("# Title\n\nFirst one. Second one!\n## Part\nThird?");
        assert_eq!(sentences, vec!["First one.", "Second one!", "Third?"]);
    }

    #[test]
    fn test_claim_detection() {
        let verifier = ClaimVerifier::default();
        let claims = verifier.extract_claims(
            "Rust 1.0 shipped in 2015. Ownership is enforced at compile time. \
             Try it yourself. What do you think?",
        );
        assert_eq!(
            claims,
            vec!["Rust 1.0 shipped in 2015.", "Ownership is enforced at compile time."]
        );
    }

    #[test]
    fn test_verify_against_sources() {
        let verifier = ClaimVerifier::default();
        let sources = vec![
            source("book", "Rust enforces ownership at compile time, without a garbage collector."),
            source("news", "The Rust project shipped version 1.0 in May 2015."),
        ];
        let report = verifier.verify(
            &draft("Ownership is enforced at compile time. Rust shipped 1.0 in 2015. Penguins are Antarctic birds."),
            &sources,
        );

        assert_eq!(report.claims.len(), 3);
        assert_eq!(report.verified, 2);
        assert_eq!(report.flagged, 1);
        assert!((report.confidence - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(report.claims[0].supporting_source.as_deref(), Some("book"));
        assert_eq!(report.claims[1].supporting_source.as_deref(), Some("news"));
        assert!(!report.claims[2].verified);
        assert_eq!(report.claims[2].supporting_source, None);
    }

    #[test]
    fn test_no_claims_means_full_confidence() {
        let report = ClaimVerifier::default().verify(&draft("Try it yourself."), &[]);
        assert!(report.claims.is_empty());
        assert_eq!(report.confidence, 1.0);
    }
}
