//! # Rhizome Core
//!
//! Core types and traits for the rhizome signal network.
//!
//! - **types**: nodes, connections, positions and the type enums
//! - **signal**: signals, their lifecycle and history records
//! - **plasticity**: Hebbian, Oja, BCM and STDP weight rules
//! - **topology**: read-only graph access used by routing
//! - **capability**: `Resonant`, `Persistable` and `SnapshotHook`
//! - **events**: lifecycle events published by the network
//!
//! ## Quick Start
//!
//! ```rust
//! use rhizome_core::prelude::*;
//!
//! let signal = SignalRequest::new(SignalType::Query, "memory_1")
//!     .to("processing_2")
//!     .strength(0.8)
//!     .into_signal(0.0, 10);
//! assert_eq!(signal.path.len(), 1);
//! ```

pub mod capability;
pub mod clock;
pub mod error;
pub mod events;
pub mod plasticity;
pub mod prelude;
pub mod signal;
pub mod snapshot;
pub mod topology;
pub mod types;
