//! Application layer orchestrating the evolution engine.
//!
//! [`engine::EvolutionEngine`] is the single entry point for registering
//! machines, creating entities and submitting events. It is constructed once
//! at the composition root and shared behind an `Arc`.
//! [`scheduler::EvolutionScheduler`] drives it periodically.

pub mod engine;
pub mod registry;
pub mod scheduler;
