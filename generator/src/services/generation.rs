//! Draft generators: the remote generation service and the offline template fallback.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

use super::keyword_index::tokenize;
use super::rag::RagError;
use super::source_clients::GenerationClient;
use super::verification::split_sentences;
use crate::models::{Draft, GenerationRequest, RetrievalResult, Tone};

pub const REMOTE_GENERATOR: &str = "remote";
pub const TEMPLATE_GENERATOR: &str = "template";

const MAX_TEMPLATE_SECTIONS: usize = 5;
const SENTENCES_PER_SECTION: usize = 3;
const MAX_KEYWORDS: usize = 8;

/// Everything a generator needs to write one draft
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationInput {
    pub topic: String,
    pub tone: Tone,
    /// Target length in words
    pub length: u32,
    pub user_context: Option<String>,
    /// Merged retrieval results, best first
    pub sources: Vec<RetrievalResult>,
}

impl GenerationInput {
    pub fn new(request: &GenerationRequest, sources: Vec<RetrievalResult>) -> Self {
        Self {
            topic: request.topic.clone(),
            tone: request.options.tone,
            length: request.options.length,
            user_context: request.options.user_context.clone(),
            sources,
        }
    }
}

#[async_trait]
pub trait Generator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, input: &GenerationInput) -> Result<Draft, RagError>;
}

// ============================================================================
// Remote generation
// ============================================================================

pub struct RemoteGenerator {
    client: GenerationClient,
}

impl RemoteGenerator {
    pub fn new(client: GenerationClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Generator for RemoteGenerator {
    fn name(&self) -> &str {
        REMOTE_GENERATOR
    }

    async fn generate(&self, input: &GenerationInput) -> Result<Draft, RagError> {
        let prompt = build_prompt(input);
        // Roughly 1.4 tokens per English word
        let max_tokens = (input.length as f64 * 1.4).ceil() as u32;

        let text = self.client.generate(&prompt, input.tone, max_tokens).await?;
        if text.trim().is_empty() {
            return Err(RagError::Generation("generation service returned no text".to_string()));
        }

        let draft = draft_from_text(&text, input, REMOTE_GENERATOR);
        if draft.body.trim().is_empty() {
            return Err(RagError::Generation("generation service returned a title without a body".to_string()));
        }
        Ok(draft)
    }
}

/// Prompt with numbered sources so the model can ground its claims
pub fn build_prompt(input: &GenerationInput) -> String {
    let mut prompt = format!(
        "Write a {} blog post of about {} words on \"{}\".\n",
        input.tone, input.length, input.topic
    );
    if let Some(ctx) = &input.user_context {
        prompt.push_str(&format!("Reader context: {}\n", ctx));
    }
    prompt.push_str("Start with a '# ' title line. Only state facts supported by the sources.\n");

    if !input.sources.is_empty() {
        prompt.push_str("\nSources:\n");
        for (i, source) in input.sources.iter().enumerate() {
            let label = source.title().unwrap_or(source.id.as_str());
            prompt.push_str(&format!("[{}] {}: {}\n", i + 1, label, source.content.trim()));
        }
    }
    prompt
}

/// Split generated text into a draft; a leading `# ` line becomes the title
pub fn draft_from_text(text: &str, input: &GenerationInput, generator: &str) -> Draft {
    let text = text.trim();
    let (title, body) = match text.split_once('\n') {
        Some((first, rest)) if first.trim_start().starts_with('#') => {
            (first.trim_start_matches('#').trim().to_string(), rest.trim().to_string())
        }
        None if text.starts_with('#') => (text.trim_start_matches('#').trim().to_string(), String::new()),
        _ => (default_title(&input.topic, input.tone), text.to_string()),
    };

    let title = if title.is_empty() {
        default_title(&input.topic, input.tone)
    } else {
        title
    };

    Draft {
        summary: summarize(&body, &input.topic),
        keywords: extract_keywords(&format!("{} {}", input.topic, body), MAX_KEYWORDS),
        title,
        body,
        generator: generator.to_string(),
    }
}

// ============================================================================
// Template fallback
// ============================================================================

/// Offline generator that assembles a draft from the retrieved sources
#[derive(Debug, Clone, Default)]
pub struct TemplateGenerator;

impl TemplateGenerator {
    pub fn new() -> Self {
        Self
    }

    fn intro(topic: &str, tone: Tone) -> String {
        match tone {
            Tone::Formal => format!(
                "This article examines {} and summarises the principal findings of the available sources.",
                topic
            ),
            Tone::Casual => format!("So you want to know about {}? Here's the short version.", topic),
            Tone::Professional => format!(
                "{} comes up often in practice. This post collects the key points worth knowing.",
                title_case(topic)
            ),
            Tone::Friendly => format!(
                "Curious about {}? Let's walk through it together, one step at a time.",
                topic
            ),
        }
    }

    fn conclusion(topic: &str, tone: Tone) -> String {
        match tone {
            Tone::Formal => format!(
                "In summary, the sources above provide a consistent account of {}.",
                topic
            ),
            Tone::Casual => format!("That's the gist of {}. Not so scary after all.", topic),
            Tone::Professional => format!(
                "Taken together, these points give a practical starting point for working with {}.",
                topic
            ),
            Tone::Friendly => format!(
                "We hope this helped make {} a little clearer. Keep exploring!",
                topic
            ),
        }
    }
}

#[async_trait]
impl Generator for TemplateGenerator {
    fn name(&self) -> &str {
        TEMPLATE_GENERATOR
    }

    async fn generate(&self, input: &GenerationInput) -> Result<Draft, RagError> {
        let topic = input.topic.trim();
        if topic.is_empty() {
            return Err(RagError::Generation("cannot build a draft without a topic".to_string()));
        }

        let mut body = String::new();
        body.push_str(&Self::intro(topic, input.tone));
        body.push_str("\n\n");

        let mut seen = HashSet::new();
        let mut sections = 0;
        for source in &input.sources {
            if sections == MAX_TEMPLATE_SECTIONS {
                break;
            }
            if !seen.insert(source.id.as_str()) {
                continue;
            }
            let excerpt: Vec<String> = split_sentences(&source.content)
                .into_iter()
                .take(SENTENCES_PER_SECTION)
                .collect();
            if excerpt.is_empty() {
                continue;
            }

            sections += 1;
            let heading = source
                .title()
                .map(str::to_string)
                .unwrap_or_else(|| format!("Key Point {}", sections));
            body.push_str(&format!("## {}\n\n{}\n\n", heading, excerpt.join(" ")));
        }

        if sections == 0 {
            body.push_str("## Key Points\n\n");
            body.push_str(&format!(
                "There is little reference material on {} yet, so this overview stays general.",
                topic
            ));
            if let Some(ctx) = &input.user_context {
                body.push_str(&format!(" It is written with this in mind: {}.", ctx.trim_end_matches('.')));
            }
            body.push_str("\n\n");
        }

        body.push_str("## Conclusion\n\n");
        body.push_str(&Self::conclusion(topic, input.tone));

        Ok(Draft {
            title: default_title(topic, input.tone),
            summary: summarize(&body, topic),
            keywords: extract_keywords(&format!("{} {}", topic, body), MAX_KEYWORDS),
            body,
            generator: TEMPLATE_GENERATOR.to_string(),
        })
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub fn default_title(topic: &str, tone: Tone) -> String {
    let topic = title_case(topic.trim());
    match tone {
        Tone::Formal => format!("{}: An Overview", topic),
        Tone::Casual => format!("Let's Talk About {}", topic),
        Tone::Professional => format!("{}: What You Need to Know", topic),
        Tone::Friendly => format!("A Friendly Guide to {}", topic),
    }
}

/// First two sentences of the text, or the topic when there are none
fn summarize(body: &str, topic: &str) -> String {
    let sentences = split_sentences(body);
    if sentences.is_empty() {
        return format!("An introduction to {}.", topic);
    }
    sentences.into_iter().take(2).collect::<Vec<_>>().join(" ")
}

/// Most frequent content tokens; ties keep first-occurrence order
pub fn extract_keywords(text: &str, limit: usize) -> Vec<String> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (position, token) in tokenize(text).into_iter().enumerate() {
        counts.entry(token).or_insert((0, position)).0 += 1;
    }

    let mut ranked: Vec<(String, usize, usize)> = counts
        .into_iter()
        .map(|(token, (count, first))| (token, count, first))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

    ranked.into_iter().take(limit).map(|(token, _, _)| token).collect()
}

pub fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
