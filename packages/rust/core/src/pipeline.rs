//! End-to-end research pipeline: fan-out → aggregate → synthesize → finalize.
//!
//! [`Researcher::research`] always produces a [`ResearchResult`] for a valid
//! query. Source failures, missing keys and synthesis failures degrade the
//! answer instead of failing the request.

use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use triangulate_shared::{
    AppConfig, Credentials, ResearchError, ResearchQuery, ResearchResult, Result, SourceKind,
};

use crate::aggregator::{Aggregation, Aggregator};
use crate::postprocess::finalize;
use crate::prompts::PromptSet;
use crate::synthesizer::Synthesizer;

pub const NO_RESULTS_ANSWER: &str =
    "No search results found from any source. Please try a different query.";
pub const SYNTHESIS_FAILED_ANSWER: &str =
    "Failed to generate an answer from any source. Please try again or refine your query.";
const FALLBACK_HEADER: &str =
    "(Answer synthesis failed, showing the AI search analysis as a fallback)";

/// Result of one research request.
#[derive(Debug, Clone)]
pub struct ResearchOutcome {
    pub result: ResearchResult,
    /// One line per source or synthesis failure, in the order they occurred.
    pub diagnostics: Vec<String>,
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when a source adapter returns results.
    fn source_finished(&self, kind: SourceKind, results: usize);
    /// Called when a source adapter is skipped or fails.
    fn source_failed(&self, kind: SourceKind, reason: &str);
    /// Called when the pipeline completes.
    fn done(&self, outcome: &ResearchOutcome);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn source_finished(&self, _kind: SourceKind, _results: usize) {}
    fn source_failed(&self, _kind: SourceKind, _reason: &str) {}
    fn done(&self, _outcome: &ResearchOutcome) {}
}

// ---------------------------------------------------------------------------
// Researcher
// ---------------------------------------------------------------------------

pub struct Researcher {
    aggregator: Aggregator,
    synthesizer: Synthesizer,
    tolerance: f64,
}

impl Researcher {
    pub fn new(config: &AppConfig, credentials: &Credentials, prompts: &PromptSet) -> Result<Self> {
        Ok(Self {
            aggregator: Aggregator::new(config, credentials, prompts)?,
            synthesizer: Synthesizer::new(
                &config.synthesis,
                credentials.synthesis.as_deref(),
                prompts,
            )?,
            tolerance: config.balance.tolerance_pct,
        })
    }

    /// Keys from the environment, prompts from the config's overrides.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let credentials = Credentials::from_env(config);
        let prompts = PromptSet::from_config(&config.prompts)?;
        Self::new(config, &credentials, &prompts)
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Run one research request.
    ///
    /// Fails only when the query is empty after trimming.
    #[instrument(skip_all, fields(request_id = %Uuid::now_v7(), custom_urls = request.custom_urls.len()))]
    pub async fn research(
        &self,
        request: &ResearchQuery,
        progress: &dyn ProgressReporter,
    ) -> Result<ResearchOutcome> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(ResearchError::validation("query must not be empty"));
        }

        let start = Instant::now();
        info!(language = %request.language, "starting research");

        // --- Phase 1: Sources ---
        progress.phase("Searching sources");
        let aggregation = match self
            .aggregator
            .aggregate(query, &request.custom_urls, progress)
            .await
        {
            Ok(aggregation) => aggregation,
            Err(ResearchError::NoSources { diagnostics }) => {
                warn!("no results from any source");
                return Ok(self.report(
                    empty_result(query, NO_RESULTS_ANSWER.to_string()),
                    diagnostics,
                    start,
                    progress,
                ));
            }
            Err(e) => {
                warn!(error = %e, "research failed");
                let answer = format!("An error occurred while researching: {e}");
                return Ok(self.report(
                    empty_result(query, answer),
                    vec![e.to_string()],
                    start,
                    progress,
                ));
            }
        };

        let Aggregation {
            pool,
            ai_answer,
            web_answer,
            mut diagnostics,
        } = aggregation;

        // --- Phase 2: Synthesis ---
        progress.phase("Synthesizing answer");
        let synthesis = self
            .synthesizer
            .synthesize(query, &pool, ai_answer.as_deref(), web_answer.as_deref())
            .await;

        // --- Phase 3: Post-processing ---
        progress.phase("Finalizing");
        let result = match synthesis {
            Ok(synthesis) => finalize(
                query,
                &synthesis.answer,
                pool,
                &synthesis.used_urls,
                self.tolerance,
            ),
            Err(e) => {
                warn!(error = %e, "synthesis failed, using fallback answer");
                diagnostics.push(format!("Synthesis: {e}"));
                let answer = match ai_answer.as_deref().filter(|a| !a.trim().is_empty()) {
                    Some(ai_answer) => format!("{FALLBACK_HEADER}\n\n{ai_answer}"),
                    None => SYNTHESIS_FAILED_ANSWER.to_string(),
                };
                finalize(query, &answer, pool, &[], self.tolerance)
            }
        };

        Ok(self.report(result, diagnostics, start, progress))
    }

    fn report(
        &self,
        result: ResearchResult,
        diagnostics: Vec<String>,
        start: Instant,
        progress: &dyn ProgressReporter,
    ) -> ResearchOutcome {
        let outcome = ResearchOutcome {
            result,
            diagnostics,
            elapsed: start.elapsed(),
        };
        info!(
            sources = outcome.result.sources.len(),
            used = outcome.result.sources.iter().filter(|s| s.used).count(),
            diagnostics = outcome.diagnostics.len(),
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "research complete"
        );
        progress.done(&outcome);
        outcome
    }
}

fn empty_result(query: &str, answer: String) -> ResearchResult {
    ResearchResult {
        query: query.to_string(),
        answer,
        sources: Vec::new(),
        generated_at: Utc::now(),
    }
}
