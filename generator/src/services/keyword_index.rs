//! Okapi BM25 inverted index over the document corpus.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::models::{Document, Metadata};

const K1: f64 = 1.2;
const B: f64 = 0.75;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordHit {
    pub id: String,
    /// BM25 score normalised by the best score of the query
    pub score: f64,
    pub metadata: Metadata,
}

struct IndexedDoc {
    length: usize,
    term_freqs: HashMap<String, u32>,
    metadata: Metadata,
}

#[derive(Default)]
struct Inner {
    docs: IndexMap<String, IndexedDoc>,
    postings: HashMap<String, HashSet<String>>,
    total_length: usize,
}

impl Inner {
    fn remove(&mut self, id: &str) -> bool {
        let Some(doc) = self.docs.shift_remove(id) else {
            return false;
        };
        self.total_length -= doc.length;
        for term in doc.term_freqs.keys() {
            if let Some(ids) = self.postings.get_mut(term) {
                ids.remove(id);
                if ids.is_empty() {
                    self.postings.remove(term);
                }
            }
        }
        true
    }
}

#[derive(Default)]
pub struct KeywordIndex {
    inner: RwLock<Inner>,
}

impl KeywordIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index (or re-index) a document
    pub fn index(&self, document: &Document) {
        let text = match &document.title {
            Some(title) => format!("{} {}", title, document.content),
            None => document.content.clone(),
        };
        let tokens = tokenize(&text);

        let mut term_freqs: HashMap<String, u32> = HashMap::new();
        for token in &tokens {
            *term_freqs.entry(token.clone()).or_insert(0) += 1;
        }

        let mut inner = self.inner.write();
        inner.remove(&document.id);

        for term in term_freqs.keys() {
            inner
                .postings
                .entry(term.clone())
                .or_default()
                .insert(document.id.clone());
        }
        inner.total_length += tokens.len();
        inner.docs.insert(
            document.id.clone(),
            IndexedDoc {
                length: tokens.len(),
                term_freqs,
                metadata: document.to_metadata(),
            },
        );
    }

    pub fn remove(&self, id: &str) -> bool {
        self.inner.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().docs.is_empty()
    }

    /// Best `k` documents for `query`; ties keep indexing order
    pub fn search(&self, query: &str, k: usize) -> Vec<KeywordHit> {
        let mut terms = tokenize(query);
        let mut seen = HashSet::new();
        terms.retain(|t| seen.insert(t.clone()));

        let inner = self.inner.read();
        let n = inner.docs.len();
        if n == 0 || terms.is_empty() || k == 0 {
            return Vec::new();
        }
        let avg_len = (inner.total_length as f64 / n as f64).max(1.0);

        let mut scores: HashMap<&str, f64> = HashMap::new();
        for term in &terms {
            let Some(ids) = inner.postings.get(term) else {
                continue;
            };
            let df = ids.len() as f64;
            let idf = (1.0 + (n as f64 - df + 0.5) / (df + 0.5)).ln();

            for id in ids {
                let Some(doc) = inner.docs.get(id) else {
                    continue;
                };
                let tf = doc.term_freqs.get(term).copied().unwrap_or(0) as f64;
                let norm = K1 * (1.0 - B + B * doc.length as f64 / avg_len);
                *scores.entry(id.as_str()).or_insert(0.0) += idf * tf * (K1 + 1.0) / (tf + norm);
            }
        }

        let best = scores.values().cloned().fold(0.0f64, f64::max);
        if best <= 0.0 {
            return Vec::new();
        }

        let mut ranked: Vec<(usize, &str, f64)> = scores
            .into_iter()
            .filter_map(|(id, score)| inner.docs.get_index_of(id).map(|pos| (pos, id, score)))
            .collect();
        ranked.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        ranked.truncate(k);

        ranked
            .into_iter()
            .filter_map(|(_, id, score)| {
                inner.docs.get(id).map(|doc| KeywordHit {
                    id: id.to_string(),
                    score: score / best,
                    metadata: doc.metadata.clone(),
                })
            })
            .collect()
    }
}

/// Lower-cased alphanumeric tokens with stop words removed
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .filter(|w| w.chars().count() > 1 && !is_stop_word(w))
        .collect()
}

pub fn is_stop_word(word: &str) -> bool {
    matches!(
        word,
        "the"
            | "and"
            | "for"
            | "are"
            | "but"
            | "not"
            | "you"
            | "all"
            | "can"
            | "was"
            | "were"
            | "one"
            | "our"
            | "has"
            | "have"
            | "had"
            | "its"
            | "it"
            | "is"
            | "be"
            | "been"
            | "this"
            | "that"
            | "with"
            | "from"
            | "they"
            | "will"
            | "would"
            | "there"
            | "their"
            | "what"
            | "about"
            | "which"
            | "when"
            | "into"
            | "of"
            | "to"
            | "in"
            | "on"
            | "an"
            | "as"
            | "at"
            | "by"
            | "or"
            | "if"
            | "so"
            | "do"
            | "we"
            | "he"
            | "she"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> KeywordIndex {
        let index = KeywordIndex::new();
        index.index(&Document::new("rust", "Rust ownership and borrowing make memory safety practical."));
        index.index(&Document::new("tokio", "Tokio is an async runtime for Rust network services."));
        index.index(&Document::new("garden", "Tomatoes need sun, water and patience."));
        index
    }

    #[test]
    fn test_tokenize_drops_stop_words() {
        assert_eq!(
            tokenize("The Rust runtime, and its async I/O!"),
            vec!["rust", "runtime", "async"]
        );
    }

    #[test]
    fn test_search_ranks_relevant_documents() {
        let index = corpus();
        let hits = index.search("async rust runtime", 10);

        assert_eq!(hits[0].id, "tokio");
        assert_eq!(hits[0].score, 1.0);
        assert!(hits.iter().all(|h| h.id != "garden"));
        assert!(hits.iter().all(|h| h.score > 0.0 && h.score <= 1.0));
    }

    #[test]
    fn test_search_respects_k_and_empty_queries() {
        let index = corpus();
        assert_eq!(index.search("rust", 1).len(), 1);
        assert!(index.search("the and of", 5).is_empty());
        assert!(index.search("quantum", 5).is_empty());
    }

    #[test]
    fn test_reindex_and_remove() {
        let index = corpus();
        index.index(&Document::new("garden", "Rust on garden tools is a different kind of rust."));
        assert_eq!(index.len(), 3);
        assert!(index.search("tomatoes", 5).is_empty());
        assert!(index.search("garden", 5).iter().any(|h| h.id == "garden"));

        assert!(index.remove("garden"));
        assert!(!index.remove("garden"));
        assert!(index.search("garden", 5).is_empty());
    }

    #[test]
    fn test_hit_metadata_carries_content() {
        let index = corpus();
        let hit = &index.search("tomatoes", 1)[0];
        assert_eq!(
            hit.metadata["content"],
            serde_json::json!("Tomatoes need sun, water and patience.")
        );
    }
}
