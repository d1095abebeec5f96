mod instance_repository;

pub use instance_repository::*;
