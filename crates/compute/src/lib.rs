//! Compute provider adapter over the Compute Engine REST API.

pub mod client;
pub mod error;
pub mod types;

pub use client::{ComputeClient, DEFAULT_BASE_URL};
pub use error::{ComputeError, ComputeResult};
