//! Domain types shared between orchestrator and agents.
//!
//! Note: Persistence logic lives in the orchestrator, execution logic in the agent.

pub mod agent;
pub mod build;
pub mod job;
