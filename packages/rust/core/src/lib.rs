//! Research orchestration for Triangulate.
//!
//! This crate ties the source adapters, answer synthesis and post-processing
//! into one workflow ([`Researcher::research`]).

pub mod aggregator;
pub mod pipeline;
pub mod postprocess;
pub mod prompts;
pub mod synthesizer;

pub use aggregator::{Aggregation, Aggregator, CandidatePool, dedup_key};
pub use pipeline::{ProgressReporter, ResearchOutcome, Researcher, SilentProgress};
pub use postprocess::{BalanceReport, KindShare, finalize};
pub use prompts::PromptSet;
pub use synthesizer::{Synthesis, Synthesizer};
