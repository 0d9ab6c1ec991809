//! Entity Module
//!
//! The base representation shared by every managed resource: identity, the
//! current/desired state pair, timestamps, ownership and detail attributes.

pub mod details;
pub mod model;
pub mod network;
pub mod types;

pub use details::*;
pub use model::*;
pub use network::*;
pub use types::*;
