//! # Rhizome
//!
//! A self-organizing network of typed nodes that route signals to each
//! other and rewire themselves as traffic flows.
//!
//! Connections strengthen with use and decay when idle. Weights adapt
//! under Hebbian, BCM and STDP rules, weak connections are pruned, and
//! sparse regions regrow by spatial affinity.
//!
//! ## Quick Start
//!
//! ```rust
//! use rhizome::prelude::*;
//!
//! let rhizome = Rhizome::builder().seed(1).build().unwrap();
//! let seeds = rhizome.seed_network().unwrap();
//!
//! // Every seed node is wired to the other four.
//! assert_eq!(rhizome.get_neighbors(&seeds[0]).len(), 4);
//!
//! rhizome
//!     .send_signal(
//!         SignalRequest::new(SignalType::Query, seeds[0].clone())
//!             .to(seeds[3].clone())
//!             .strength(0.9),
//!     )
//!     .unwrap();
//! rhizome.process_until_idle(20);
//!
//! let stats = rhizome.statistics();
//! assert_eq!(stats.signals_delivered, 1);
//! ```
//!
//! ## Architecture
//!
//! - [`rhizome_core`]: node, connection and signal types, plasticity
//!   rules, capability traits and events
//! - [`rhizome_runtime`]: graph store, router, pathfinder, connection
//!   manager, learning, maintenance and the [`Rhizome`](rhizome_runtime::network::Rhizome) handle
//!
//! ## Propagation modes
//!
//! | Mode      | Reach |
//! |-----------|-------|
//! | directed  | one pathfinder-chosen hop at a time towards a target |
//! | broadcast | every node whose distance-attenuated strength clears the floor |
//! | cascade   | breadth-first, towards a target when one is given |
//! | flood     | breadth-first to every neighbour |
//! | resonant  | every node tuned to the signal's frequency |
//! | quantum   | straight to the entanglement partner, undecayed |

pub use rhizome_core;
pub use rhizome_runtime;

pub mod prelude {
    //! Everything needed to build and drive a rhizome.
    pub use rhizome_runtime::prelude::*;
}
