//! Maestro - declarative workflow orchestration for heterogeneous agents
//!
//! Executes workflows described as DAGs of tasks, where each task is one
//! call to a configured agent:
//! - Dependency-aware scheduling with sequential or parallel dispatch
//! - Per-agent resilience: circuit breaker, bounded retry with backoff,
//!   timeout enforcement
//! - Chat-LLM, JSON-RPC, and generic HTTP agent transports behind one
//!   invocation contract
//! - Event bus broadcasting every state transition to observers
//! - REST control surface and CLI driver

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;
