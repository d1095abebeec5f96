//! Remote script execution.
//!
//! - [`ShellTransport`] - builds the process that reaches a target's shell
//! - [`ScriptRunner`] - spawns it, streams output, enforces timeout and cancellation

mod runner;
mod transport;

pub use runner::{OutputChunk, OutputSender, ScriptRunner};
pub use transport::{LocalShellTransport, RemoteTarget, ShellTransport, SshTransport};
