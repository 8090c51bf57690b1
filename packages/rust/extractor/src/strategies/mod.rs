//! Extraction strategies and the cascade that runs them.
//!
//! Strategies are tried in priority order and the first one that produces
//! enough text wins. Strategies that need a parsed DOM are skipped when DOM
//! parsing is unavailable.

mod fulltext;
mod pattern;
mod readability;
mod structured;

use tracing::{debug, trace};
use url::Url;

use crate::DomCapability;

pub use fulltext::FullTextStrategy;
pub use pattern::PatternStrategy;
pub use readability::ReadabilityStrategy;
pub use structured::StructuredDataStrategy;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A fetched page handed to each strategy.
#[derive(Debug, Clone, Copy)]
pub struct Page<'a> {
    pub html: &'a str,
    pub url: &'a Url,
    /// Floor for the last-resort strategies.
    pub min_chars: usize,
    /// Floor for the content-focused strategies.
    pub success_chars: usize,
}

/// What a strategy found.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyOutput {
    pub content: String,
    /// Title found by the strategy itself (e.g. a JSON-LD headline).
    pub title: Option<String>,
}

impl StrategyOutput {
    fn content(content: String) -> Self {
        Self {
            content,
            title: None,
        }
    }
}

/// One way of pulling the main text out of an HTML page.
pub trait ExtractionStrategy: Send + Sync {
    /// Human-readable strategy name for tracing.
    fn name(&self) -> &'static str;

    /// Whether this strategy parses the page into a DOM.
    fn requires_dom(&self) -> bool {
        false
    }

    /// Return the extracted text, or `None` if it found too little.
    fn extract(&self, page: &Page<'_>) -> Option<StrategyOutput>;
}

// ---------------------------------------------------------------------------
// Cascade
// ---------------------------------------------------------------------------

/// The winning strategy's name and output.
#[derive(Debug, Clone)]
pub struct CascadeHit {
    pub strategy: &'static str,
    pub output: StrategyOutput,
}

/// Holds strategies in priority order.
pub struct StrategyCascade {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
}

impl StrategyCascade {
    /// Readability, structured data, pattern matching, then full text.
    pub fn new() -> Self {
        Self {
            strategies: vec![
                Box::new(ReadabilityStrategy),
                Box::new(StructuredDataStrategy),
                Box::new(PatternStrategy),
                Box::new(FullTextStrategy),
            ],
        }
    }

    /// Build a cascade from custom strategies.
    pub fn with_strategies(strategies: Vec<Box<dyn ExtractionStrategy>>) -> Self {
        Self { strategies }
    }

    /// Names in the order they run.
    pub fn names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Run each applicable strategy until one succeeds.
    pub fn run(&self, page: &Page<'_>, dom: DomCapability) -> Option<CascadeHit> {
        for strategy in &self.strategies {
            if strategy.requires_dom() && !dom.is_available() {
                trace!(strategy = strategy.name(), "skipped, DOM parsing unavailable");
                continue;
            }
            match strategy.extract(page) {
                Some(output) => {
                    debug!(
                        strategy = strategy.name(),
                        chars = output.content.chars().count(),
                        "strategy succeeded"
                    );
                    return Some(CascadeHit {
                        strategy: strategy.name(),
                        output,
                    });
                }
                None => trace!(strategy = strategy.name(), "insufficient content"),
            }
        }
        None
    }
}

impl Default for StrategyCascade {
    fn default() -> Self {
        Self::new()
    }
}
