use std::path::PathBuf;

use thiserror::Error;

use crate::crd::loki::ConversionError;
use crate::enforce::EnforceError;

/// Listing rule objects failed. Fatal to the sync loop.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("failed to list {kind}: {message}")]
    List { kind: &'static str, message: String },

    #[error("failed to convert legacy {kind}: {source}")]
    Conversion {
        kind: &'static str,
        #[source]
        source: ConversionError,
    },
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("rule {rule}: {source}")]
    Enforce {
        rule: String,
        #[source]
        source: EnforceError,
    },

    #[error("failed to write rule object: {0}")]
    Create(String),

    #[error("rules API answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("rules API request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to encode rule group: {0}")]
    Encode(#[from] serde_yaml::Error),

    #[error("{failed} of {total} rule groups failed for tenant {tenant}")]
    Partial {
        tenant: String,
        failed: usize,
        total: usize,
    },

    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),
}

impl PublishError {
    /// Failure reason label for metrics rule publishing.
    pub fn reason(&self) -> &'static str {
        match self {
            PublishError::Enforce { source, .. } => source.reason(),
            _ => "create_rule",
        }
    }
}

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("no credentials registered for tenant {0}")]
    UnknownTenant(String),

    #[error("no tenant selected")]
    NoCurrentTenant,

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse auth context: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("tenant discovery failed: {0}")]
    Discovery(String),

    #[error("token request failed: {0}")]
    Token(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}
