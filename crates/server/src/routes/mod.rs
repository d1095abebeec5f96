mod caller;
mod health;
pub mod provisioning;
pub mod scripts;
mod sessions;
pub mod sse;

pub use caller::*;
pub use health::*;
pub use sessions::*;
