//! Domain layer - Port definitions
//!
//! This module defines the traits through which external collaborators
//! (transport, orchestration) talk to the registry, following hexagonal
//! architecture principles.

pub mod ports;

pub use ports::*;
