//! Answer synthesis over the candidate pool.
//!
//! One completion request carries every source, grouped by kind. The
//! returned text is scanned for its "SOURCES USED" section to decide which
//! sources the answer relied on.

use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, instrument, warn};

use triangulate_shared::{
    Priority, ResearchError, Result, SearchResult, SourceKind, SynthesisConfig,
};
use triangulate_sources::{ChatClient, ChatMessage, ChatRequest};

use crate::aggregator::{CandidatePool, dedup_key};
use crate::prompts::PromptSet;

const SERVICE: &str = "synthesis";

/// AI-search results flagged as high priority in the prompt.
const PRIORITY_SLOTS: usize = 3;
/// AI-search URLs forced into the used set by the safety net.
const SAFETY_NET_SLOTS: usize = 2;

pub const MISSING_AI_COVERAGE_NOTE: &str = "[IMPORTANT: This answer may be missing key insights from AI search sources. Please regenerate for a more complete analysis.]";

const FORMATTING_REQUIREMENTS: &str = r#"CRITICAL FORMATTING REQUIREMENTS:
1. USE ONLY PURE MARKDOWN - NO HTML TAGS OR ENTITIES: Do not include any HTML such as <p>, <div>, <br>, &nbsp;, etc.
2. USE PROPER PARAGRAPH SPACING: Separate paragraphs with blank lines.
3. USE PROPER HEADING SYNTAX: Use # for main headings, ## for sections, ### for subsections.
4. USE PROPER LIST SYNTAX: Use * or - for bullet points, and numbers for ordered lists.
5. FORMAT TABLES PROPERLY: Use markdown table syntax with pipes and dashes.
6. FORMAT LINKS PROPERLY: Use [text](URL) format for all links.

CONTENT REQUIREMENTS:
1. MANDATORY EQUAL BALANCE: Include information from ALL available source types in EXACTLY equal proportions (33.3% each, or 50-50 if only two are available)
2. BEGIN WITH SUMMARY: Start with a 1-2 paragraph executive summary answering the query directly
3. INCLUDE TABLE OF CONTENTS: For long answers, add a linked table of contents
4. ORGANIZE BY TOPIC: Structure by topic, not by source type
5. CITE EVERY FACT: Include a citation for every piece of information in the format "[Source Title] (URL)"
6. PRESENT BALANCED VIEWS: When sources conflict, present ALL perspectives equally

Your response MUST be in clean, properly formatted Markdown only. Avoid all HTML formatting, especially from AI search sources.

Conclude with a "SOURCES USED" section listing ALL sources referenced, organized by source type, with an equal number from each available category."#;

/// What the completion produced, with attribution resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    pub answer: String,
    /// URLs the answer is considered to rely on.
    pub used_urls: Vec<String>,
    /// Whether a parsable "SOURCES USED" section was found.
    pub section_found: bool,
    /// Whether AI-search URLs were forced into the used set.
    pub safety_net_applied: bool,
}

pub struct Synthesizer {
    client: Option<ChatClient>,
    config: SynthesisConfig,
    instruction: String,
}

impl Synthesizer {
    /// A missing key is reported when [`Synthesizer::synthesize`] runs, so
    /// the caller can still degrade to a fallback answer.
    pub fn new(config: &SynthesisConfig, api_key: Option<&str>, prompts: &PromptSet) -> Result<Self> {
        let client = match api_key {
            Some(key) => Some(ChatClient::new(
                SERVICE,
                config.endpoint.clone(),
                key,
                Duration::from_secs(config.timeout_secs),
            )?),
            None => None,
        };
        Ok(Self {
            client,
            config: config.clone(),
            instruction: prompts.synthesis_instruction(),
        })
    }

    /// Compose the answer from the pool.
    ///
    /// Errors are [`ResearchError::Config`] for a missing key and
    /// [`ResearchError::Synthesis`] for everything else.
    #[instrument(skip_all, fields(sources = pool.len(), model = %self.config.model))]
    pub async fn synthesize(
        &self,
        query: &str,
        pool: &CandidatePool,
        ai_answer: Option<&str>,
        web_answer: Option<&str>,
    ) -> Result<Synthesis> {
        let client = self.client.as_ref().ok_or_else(|| {
            ResearchError::config(format!(
                "Synthesis API key not found. Set the {} environment variable.",
                self.config.api_key_env
            ))
        })?;

        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage::system(self.instruction.clone()),
                ChatMessage::user(build_user_prompt(query, pool, ai_answer, web_answer)),
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            return_citations: false,
        };

        let completion = client
            .complete(&request)
            .await
            .map_err(|e| ResearchError::Synthesis(e.to_string()))?;

        let synthesis = resolve_attribution(completion.content, pool);
        info!(
            used = synthesis.used_urls.len(),
            section_found = synthesis.section_found,
            safety_net = synthesis.safety_net_applied,
            "answer synthesized"
        );
        Ok(synthesis)
    }
}

// ---------------------------------------------------------------------------
// Prompt
// ---------------------------------------------------------------------------

/// The user message: every source grouped by kind, then the requirements.
pub fn build_user_prompt(
    query: &str,
    pool: &CandidatePool,
    ai_answer: Option<&str>,
    web_answer: Option<&str>,
) -> String {
    let ai: Vec<&SearchResult> = pool.by_kind(SourceKind::AiSearch).collect();
    let priority_urls: Vec<&str> = ai
        .iter()
        .filter(|s| matches!(s.priority, None | Some(Priority::High)))
        .take(PRIORITY_SLOTS)
        .filter_map(|s| s.url.as_deref())
        .collect();

    let mut ai_context = if ai.is_empty() {
        "NO AI SEARCH RESULTS AVAILABLE".to_string()
    } else {
        let entries = ai
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let flagged = s
                    .url
                    .as_deref()
                    .is_some_and(|url| priority_urls.contains(&url));
                entry(i, s, &s.snippet, flagged)
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        format!("AI SEARCH RESULTS (CRITICAL SOURCE - MUST BE PROMINENTLY FEATURED):\n{entries}")
    };
    if let Some(answer) = ai_answer.filter(|a| !a.trim().is_empty()) {
        ai_context.push_str("\n\nAI SEARCH ANALYSIS (MUST BE INCORPORATED):\n");
        ai_context.push_str(answer);
    }

    let mut web_context = section(pool, SourceKind::WebSearch, "WEB SEARCH RESULTS:", |s| {
        s.snippet.as_str()
    });
    if let Some(answer) = web_answer.filter(|a| !a.trim().is_empty()) {
        if !web_context.is_empty() {
            web_context.push_str("\n\n");
        }
        web_context.push_str("FEATURED ANSWER:\n");
        web_context.push_str(answer);
    }

    let custom_context = section(pool, SourceKind::Custom, "CUSTOM SOURCES:", SearchResult::body);

    format!(
        "Answer the following query comprehensively: \"{query}\"\n\n\
         SOURCES PROVIDED:\n\
         === AI SEARCH RESULTS ===\n{ai_context}\n\n\
         === WEB SEARCH RESULTS ===\n{web_context}\n\n\
         === CUSTOM SOURCES ===\n{custom_context}\n\n\
         {FORMATTING_REQUIREMENTS}"
    )
}

fn section(
    pool: &CandidatePool,
    kind: SourceKind,
    heading: &str,
    text: impl Fn(&SearchResult) -> &str,
) -> String {
    let entries: Vec<String> = pool
        .by_kind(kind)
        .enumerate()
        .map(|(i, s)| entry(i, s, text(s), false))
        .collect();
    if entries.is_empty() {
        return String::new();
    }
    format!("{heading}\n{}", entries.join("\n\n"))
}

fn entry(index: usize, source: &SearchResult, text: &str, high_priority: bool) -> String {
    format!(
        "[{}] \"{}\" ({}){}\n{}",
        index + 1,
        source.title,
        source.url.as_deref().unwrap_or("No URL"),
        if high_priority { " [HIGH PRIORITY]" } else { "" },
        text
    )
}

// ---------------------------------------------------------------------------
// Attribution
// ---------------------------------------------------------------------------

/// URLs listed in the last "SOURCES USED" section of `text`.
///
/// `None` when there is no such section or it holds no parenthesised URL.
pub fn parse_sources_used(text: &str) -> Option<Vec<String>> {
    static SECTION_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)sources\s*used").expect("valid regex"));
    static PAREN_URL_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\((https?://[^)\s]+)\)").expect("valid regex"));

    let start = SECTION_RE.find_iter(text).last()?.end();
    let mut seen = HashSet::new();
    let urls: Vec<String> = PAREN_URL_RE
        .captures_iter(&text[start..])
        .map(|caps| caps[1].trim_end_matches(['.', ',', ';', ':']).to_string())
        .filter(|url| seen.insert(url.clone()))
        .collect();

    (!urls.is_empty()).then_some(urls)
}

/// Decide the used set for `answer` and apply the AI-search safety net.
pub fn resolve_attribution(answer: String, pool: &CandidatePool) -> Synthesis {
    let (mut used_urls, section_found) = match parse_sources_used(&answer) {
        Some(urls) => (urls, true),
        None => {
            debug!("no parsable SOURCES USED section, treating every source as used");
            (pool.urls().into_iter().map(str::to_string).collect(), false)
        }
    };

    let used_keys: HashSet<String> = used_urls.iter().map(|u| dedup_key(u)).collect();
    let ai_urls: Vec<&str> = pool
        .by_kind(SourceKind::AiSearch)
        .filter_map(|s| s.url.as_deref())
        .collect();
    let ai_cited = ai_urls.iter().any(|url| used_keys.contains(&dedup_key(url)));

    if ai_urls.is_empty() || ai_cited {
        return Synthesis {
            answer,
            used_urls,
            section_found,
            safety_net_applied: false,
        };
    }

    warn!(
        ai_sources = ai_urls.len(),
        "answer cites no AI search source, forcing the top results into the used set"
    );
    used_urls.extend(ai_urls.iter().take(SAFETY_NET_SLOTS).map(|u| u.to_string()));
    Synthesis {
        answer: format!("{MISSING_AI_COVERAGE_NOTE}\n\n{answer}"),
        used_urls,
        section_found,
        safety_net_applied: true,
    }
}
