//! Agent Runtime - turns an operator instruction into an order
//!
//! This crate holds the decide/act loop and everything it calls:
//! - Caller verification before any work starts (`auth`)
//! - The model call behind the `DecisionStep` trait (`llm`)
//! - The fixed action manifest and its dispatcher (`tools`)
//! - Account-scoped catalog lookups (`resolver`) and the order write (`writer`)
//! - The fire-and-forget progress side channel (`progress`)
//!
//! # Architecture
//!
//! `AgentRuntime::run` seeds the history with a rendered system prompt and the
//! user's instruction, then alternates:
//! 1. **Decide** - ask the decision step for the next message
//! 2. **Act** - dispatch every action request that message carries
//!
//! until a message arrives with no action requests, the iteration cap is hit,
//! the deadline passes, or the caller cancels.
//!
//! # Safety Principle
//!
//! The model only chooses which action to call next. Prices, order numbers and
//! tenant scope are decided by the store, never by the model.

pub mod auth;
pub mod errors;
pub mod llm;
pub mod message;
pub mod progress;
pub mod prompt;
pub mod resolver;
pub mod runtime;
pub mod tools;
pub mod writer;

#[cfg(test)]
mod testing;

pub use auth::{CallerVerifier, StaticTokenVerifier};
pub use errors::AgentError;
pub use llm::{DecisionStep, OpenAiDecisionStep, ScriptedDecisionStep};
pub use message::{ActionRequest, ActionResult, Message, Role, RunState, StructuredUpdate};
pub use runtime::{AgentRuntime, AgentRuntimeOptions, RunFailure, RunRequest, RunResponse};
