//! Recall core: query answering and response caching over a pre-built code
//! index.
//!
//! A [`engine::QueryEngine`] normalizes each query's scope against the
//! workspace, probes a tiered deterministic cache and a paraphrase-aware
//! semantic cache, and on a miss ranks retrieved candidates by multi-signal
//! scoring and entity-kind biasing before assembling context packs. Index
//! access goes through the [`index::IndexBackend`] trait. With the `python`
//! feature the pure helpers are also exported as the `_recall_core`
//! extension module.

pub mod cache;
pub mod config;
pub mod engine;
pub mod errors;
pub mod index;
pub mod models;
pub mod query;
pub mod workspace;

#[cfg(feature = "python")]
mod python;

pub use config::EngineConfig;
pub use engine::{Clock, EngineStats, QueryEngine};
pub use errors::{RecallError, RecallResult};
pub use index::{IndexBackend, StaticIndex};
pub use models::{CachedResponse, ContextPack, PackOutcome, Query, QueryDepth, Version};
