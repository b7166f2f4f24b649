//! Service layer
//!
//! Business logic on top of the queue store: submission, result routing,
//! agent registry management and statistics. Handlers in `api` call into
//! these modules; nothing here knows about HTTP.

pub mod agent;
pub mod job;
pub mod result;
pub mod stats;
