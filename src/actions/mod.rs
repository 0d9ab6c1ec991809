//! Action Catalog Module
//!
//! Derives the operations legally invocable on an entity from its type and
//! current state.

pub mod catalog;

pub use catalog::*;
