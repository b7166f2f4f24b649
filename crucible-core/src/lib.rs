//! Crucible Core
//!
//! Core types and abstractions for the Crucible build orchestration system.
//!
//! This crate contains:
//! - Domain types: Core business entities (BuildJob, AgentInfo, etc.)
//! - DTOs: Data transfer objects for inter-service communication

pub mod domain;
pub mod dto;
