mod instance;

pub use instance::*;
