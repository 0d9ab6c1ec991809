//! Provisioning Registry
//!
//! Concurrent arena of zones, pods, clusters, hosts and storage pools with
//! hierarchy checks, lifecycle transitions and change events.

pub mod events;
pub mod provisioning;
pub mod requests;
pub mod seed;

pub use events::*;
pub use provisioning::*;
pub use requests::*;
pub use seed::*;
