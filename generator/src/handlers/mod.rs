//! HTTP handlers; thin adapters over the controller, job queue and orchestrator

pub mod documents;
pub mod posts;
pub mod system;
