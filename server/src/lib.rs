//! Catalog process assembly.
//!
//! Wires the Postgres stores, the Redpanda clients and the runtime tasks into
//! one [`Application`](lifecycle::Application), configured from the
//! environment by [`Config`](config::Config).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod lifecycle;

pub use config::Config;
pub use lifecycle::{Application, Parts};
