mod client;
pub mod reply;
#[cfg(test)]
pub mod scripted;

pub use client::LlmClient;
pub use reply::{ReplyError, parse_json_object};
#[cfg(test)]
pub use scripted::ScriptedOracle;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("missing gateway url")]
    MissingGateway,
    #[error("http error: {0}")]
    Http(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("oracle returned an empty reply")]
    Empty,
}

/// The reasoning oracle as the import pipeline sees it: a prompt goes in and
/// free-form text comes out. Nothing about the reply is trusted.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, OracleError>;
}
