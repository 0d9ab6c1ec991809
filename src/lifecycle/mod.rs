//! Lifecycle Module
//!
//! Per-type state graphs and the state machine that validates transitions and
//! plans reconciliation steps toward a desired state.

pub mod machine;
pub mod states;

pub use machine::*;
pub use states::*;
