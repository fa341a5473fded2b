//! # Rhizome Runtime
//!
//! Graph store, signal routing, learning and background scheduling.
//!
//! The runtime is the living network: a petgraph-backed store shared
//! behind one lock, a router that moves signals hop by hop, a connection
//! manager that tracks each connection's lifecycle, a learning engine
//! that adapts weights, and a maintenance cycle that decays, prunes and
//! regrows the topology.

pub mod builder;
pub mod config;
pub mod connection_manager;
pub mod event_bus;
pub mod handle;
pub mod learning;
pub mod maintenance;
pub mod metrics;
pub mod network;
pub mod pathfinder;
pub mod prelude;
pub mod router;
pub mod scheduler;
pub mod session;
pub mod spatial;
pub mod topology_impl;
