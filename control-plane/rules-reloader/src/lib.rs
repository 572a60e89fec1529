pub mod config;
pub mod crd;
pub mod credentials;
pub mod enforce;
pub mod error;
pub mod k8s;
pub mod loader;
pub mod metrics;
pub mod runtime;
pub mod sync_loop;
pub mod syncer;
