//! Shared types, error model, and configuration for Triangulate.
//!
//! This crate is the foundation depended on by all other Triangulate crates.
//! It provides:
//! - [`ResearchError`], the unified error type
//! - Domain types ([`SearchResult`], [`ResearchResult`], [`ExtractionResult`], [`SourceKind`])
//! - Configuration ([`AppConfig`], [`Credentials`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AiSearchConfig, AppConfig, BalanceConfig, Credentials, DefaultsConfig, ExtractionConfig,
    PromptsConfig, SynthesisConfig, WebSearchConfig, config_dir, config_file_path, init_config,
    load_config, load_config_from, render_config, require_api_key,
};
pub use error::{ResearchError, Result};
pub use types::{
    ExtractionResult, Priority, ResearchQuery, ResearchResult, SearchResult, SourceKind,
    UNTITLED_SOURCE, derive_title,
};
