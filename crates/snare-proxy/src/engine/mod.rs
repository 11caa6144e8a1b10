//! Request routing and failure injection engine.
//!
//! - `matcher` - resolves `(method, path)` to a configured endpoint
//! - `rules` - compiled failure rules and the in-order evaluator
//! - `counters` - lock-free per-rule counters for one generation
//! - `snapshot` - immutable config generations and the swap controller

pub mod counters;
pub mod matcher;
pub mod rules;
pub mod snapshot;

pub use counters::{CounterStore, RuleId};
pub use matcher::{match_endpoint, CompiledEndpoint, MethodSet, PathPattern};
pub use rules::{
    evaluate, evaluate_with_rng, CompiledFailureRule, Disposition, FailureResponse, Trigger,
};
pub use snapshot::{ConfigSwap, Snapshot};
