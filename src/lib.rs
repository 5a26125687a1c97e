//! Chance-constrained bin packing.
//!
//! Items have random demand summarized by a nominal demand `mu` and a spread `b`; a
//! bin is feasible when `sum(mu) + Dalpha * sqrt(sum(b)) <= capacity`. The crate
//! builds a best-fit reference packing and assembles the exact second-order-cone
//! model, warm-started from that packing, for an external solver.

pub mod api;
pub mod assembler;
pub mod config;
pub mod error;
pub mod feasibility;
pub mod generator;
pub mod model;
pub mod optimizer;
pub mod pipeline;
pub mod reader;
pub mod report;
pub mod solver;
pub mod types;
pub mod uncertainty;

pub use error::{ChancePackError, Result};
