//! SQLite-backed instance registry.

mod error;
pub mod models;
mod pool;
pub mod repositories;

pub use error::*;
pub use models::{InstanceRecord, InstanceRow};
pub use pool::*;
pub use repositories::*;
