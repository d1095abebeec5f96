mod instance;
mod request;
mod script;
mod session;

pub use instance::*;
pub use request::*;
pub use script::*;
pub use session::*;
