//! Durable workflow runtime.
//!
//! Workflows are declarative step pipelines discovered from `*.workflow`
//! TOML files. Step handlers are capabilities the host injects at startup;
//! pipelines execute durably: each step result is persisted before the run
//! advances, so crashed runs resume instead of repeating work. An axum
//! inspection surface exposes registration, runs, and cancellation.

mod capability;
mod definition;
mod http;
mod runtime;
mod store;

pub use capability::{CapabilityRegistry, FnHandler, StepContext, StepHandler};
pub use definition::{discover, DefinitionError, StepSpec, WorkflowSpec};
pub use http::{router, serve};
pub use runtime::{DiscoveryReport, RuntimeConfig, WorkflowError, WorkflowRuntime};
pub use store::{RunStore, StoreError};
