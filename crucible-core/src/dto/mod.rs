//! Data Transfer Objects for inter-service communication
//!
//! This module contains DTOs used for communication between Crucible services
//! (orchestrator, agents, operator tooling). DTOs are lightweight
//! representations of domain entities optimized for network transfer.

pub mod agent;
pub mod job;
pub mod stats;
