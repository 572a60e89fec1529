pub mod logging;
pub mod server;

pub use logging::*;
pub use server::*;
