//! Rules engine and built-in rule library.
//!
//! The engine subscribes to watcher events, keeps the shadow cache current,
//! and dispatches matched events to registered rules with per-path
//! serialization, bounded parallelism, timeouts, quarantine, and an
//! execution log. Rules describe their side effects as data
//! (`RuleEffects`); the engine validates and applies them through the
//! vault, cache, and memory store.

mod apply;
mod engine;
mod rule;

pub mod library;

pub use apply::{apply_body_edits, ApplyOutcome};
pub use engine::{EngineError, EngineStats, ExecutionRecord, RuleInfo, RulesEngine};
pub use rule::{Rule, RuleContext, RuleMetadata};
