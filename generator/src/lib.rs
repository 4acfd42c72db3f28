//! Retrieval-augmented post generation.
//!
//! A [`PostGenerationController`](services::PostGenerationController) turns a
//! topic into a finished post: it validates the request, serves cached posts,
//! coalesces identical in-flight requests and retries the
//! [`RagOrchestrator`](services::RagOrchestrator) pipeline, which retrieves
//! sources, drafts, verifies claims and enhances the result.

pub mod app;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod services;

pub use app::{build_state, router};
pub use errors::{ErrorBody, PipelineError, PipelineResult};
pub use models::{AppState, GenerationRequest, Post};
pub use services::{CancellationToken, PostGenerationController, RagOrchestrator};
