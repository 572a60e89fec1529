mod types;

pub use types::{ConfigError, ReloaderConfig};
