//! Shared fixtures for rules-reloader integration tests.

pub mod cluster;

pub use cluster::InMemoryCluster;
