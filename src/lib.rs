#![recursion_limit = "256"]

// Module declarations
pub mod config;
pub mod context;
pub mod conversation;
pub mod fastpath;
pub mod guardrails;
pub mod intent;
pub mod llm;
pub mod normalizer;
pub mod orchestrator;
pub mod prompt;
pub mod rate_limit;
pub mod retrieval;
pub mod shared;
