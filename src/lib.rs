//! DC Provisioner - Datacenter Provisioning Registry
//!
//! Keeps the inventory of a provisioning control plane: zones, pods,
//! clusters, hosts and storage pools, each with a current and desired
//! lifecycle state, free-form detail attributes and an owner.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                 ProvisioningService (domain port)                 │
//! ├───────────────────────────────────────────────────────────────────┤
//! │  ┌───────────────┐  ┌──────────────────┐  ┌────────────────────┐  │
//! │  │ Registration  │  │  State Machine   │  │   Action Catalog   │  │
//! │  │ & hierarchy   │  │  (per-type graph)│  │  (guarded actions) │  │
//! │  └───────┬───────┘  └────────┬─────────┘  └─────────┬──────────┘  │
//! │          └───────────────────┼──────────────────────┘             │
//! │                  ┌───────────┴────────────┐                       │
//! │                  │  Provisioning Registry │──► RegistryEvent      │
//! │                  │  (per-type arenas)     │    (broadcast)        │
//! │                  └────────────────────────┘                       │
//! │   Zone ─┬─ Pod ── Cluster ─┬─ Host                                │
//! │         └──────────────────┴─ Storage                             │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`entity`]: Entity record, identifiers, details and pod networks
//! - [`lifecycle`]: Per-type state graphs and the transition validator
//! - [`actions`]: Catalog of operations legal in each state
//! - [`registry`]: The concurrent registry, its requests and events
//! - [`config`]: Registry configuration and topology files
//! - [`domain`]: Ports toward transport and orchestration collaborators
//! - [`error`]: Error types and handling

pub mod actions;
pub mod config;
pub mod domain;
pub mod entity;
pub mod error;
pub mod lifecycle;
pub mod registry;

// Re-export commonly used types
pub use actions::{Action, ActionCatalog};

pub use config::{RegistryConfig, TopologyConfig};

pub use domain::ports::{ManagedEntity, ProvisioningService};

pub use entity::{
    DetailChange, Details, Entity, EntityId, EntityRef, EntityType, EntityUuid, IpRange,
    Ipv4Cidr, Placement, PodNetwork,
};

pub use error::{Error, ErrorKind, Result};

pub use lifecycle::{
    AllocationState, ClusterState, HostState, Lifecycle, LifecycleState, StateMachine,
    StorageState, Transition, TransitionRequest,
};

pub use registry::{
    ClusterRegistration, HostRegistration, PodRegistration, ProvisioningRegistry,
    ReconcileOutcome, ReconcileReport, RegistryEvent, RegistryStatsSnapshot,
    StorageRegistration, TopologyReport, ZoneRegistration,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
