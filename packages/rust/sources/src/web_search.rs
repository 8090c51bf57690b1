//! Web search adapter (organic results, answer box, knowledge graph).

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use triangulate_shared::{
    Priority, ResearchError, Result, SearchResult, SourceKind, WebSearchConfig,
};

use crate::{SourceBatch, build_client, transport_error, upstream_error};

pub const SERVICE: &str = "web-search";

#[derive(Deserialize)]
struct Organic {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    snippet: Option<String>,
    #[serde(default)]
    position: Option<u32>,
}

#[derive(Deserialize)]
struct AnswerBox {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    snippet: Option<String>,
}

#[derive(Deserialize)]
struct KnowledgeGraph {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    link: Option<String>,
    #[serde(default, rename = "descriptionLink")]
    description_link: Option<String>,
    #[serde(default)]
    website: Option<String>,
}

pub struct WebSearchSource {
    http: Client,
    config: WebSearchConfig,
    api_key: String,
}

impl WebSearchSource {
    pub fn new(config: &WebSearchConfig, api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: build_client(Duration::from_secs(config.timeout_secs))?,
            config: config.clone(),
            api_key: api_key.into(),
        })
    }

    #[instrument(skip_all, fields(service = SERVICE))]
    pub async fn fetch(&self, query: &str) -> Result<SourceBatch> {
        let body = json!({
            "q": query,
            "gl": self.config.country,
            "hl": self.config.locale,
            "num": self.config.num_results,
        });

        let response = self
            .http
            .post(&self.config.endpoint)
            .header("X-API-KEY", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(upstream_error(SERVICE, status.as_u16(), &text));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| ResearchError::parse(format!("{SERVICE}: invalid response body: {e}")))?;

        let batch = parse_response(&data);
        info!(
            results = batch.results.len(),
            featured = batch.featured.len(),
            "web search complete"
        );
        Ok(batch)
    }
}

fn parse_response(data: &Value) -> SourceBatch {
    let Some(organic) = data.get("organic").and_then(Value::as_array) else {
        warn!("web search returned no organic results");
        return SourceBatch::empty(SourceKind::WebSearch);
    };

    let results = organic
        .iter()
        .filter_map(|item| Organic::deserialize(item).ok())
        .enumerate()
        .map(|(i, item)| {
            let mut result =
                SearchResult::new(SourceKind::WebSearch, item.link, item.title.unwrap_or_default())
                    .with_snippet(item.snippet.unwrap_or_default());
            result.position = item.position.or_else(|| u32::try_from(i + 1).ok());
            result.ensure_title();
            result
        })
        .collect();

    let answer_box = data
        .get("answerBox")
        .and_then(|v| AnswerBox::deserialize(v).ok());
    let knowledge_graph = data
        .get("knowledgeGraph")
        .and_then(|v| KnowledgeGraph::deserialize(v).ok());

    let mut answer_parts = Vec::new();
    if let Some(text) = answer_box.as_ref().and_then(answer_box_text) {
        answer_parts.push(text);
    }
    let mut featured = Vec::new();
    if let Some(kg) = knowledge_graph {
        let title = kg.title.unwrap_or_default();
        let description = kg.description.unwrap_or_default();
        if !title.is_empty() && !description.is_empty() {
            answer_parts.push(format!("{title}: {description}"));
        }
        let link = [kg.link, kg.description_link, kg.website]
            .into_iter()
            .flatten()
            .find(|l| !l.trim().is_empty());
        if let Some(link) = link {
            let mut result =
                SearchResult::new(SourceKind::WebSearch, Some(link), title).with_snippet(description);
            result.priority = Some(Priority::High);
            result.ensure_title();
            featured.push(result);
        }
    }

    SourceBatch {
        results,
        featured,
        answer: (!answer_parts.is_empty()).then(|| answer_parts.join("\n\n")),
        ..SourceBatch::empty(SourceKind::WebSearch)
    }
}

fn answer_box_text(answer_box: &AnswerBox) -> Option<String> {
    let body = answer_box
        .answer
        .as_deref()
        .or(answer_box.snippet.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())?;
    Some(match answer_box.title.as_deref().map(str::trim) {
        Some(title) if !title.is_empty() => format!("{title}: {body}"),
        _ => body.to_string(),
    })
}
