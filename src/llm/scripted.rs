use super::{Oracle, OracleError};
use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::Mutex;

/// Replays canned replies in order and remembers every prompt it was given.
#[derive(Default)]
pub struct ScriptedOracle {
    replies: Mutex<VecDeque<Result<String, OracleError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, text: impl Into<String>) -> Self {
        self.replies.get_mut().push_back(Ok(text.into()));
        self
    }

    pub fn fail(mut self, err: OracleError) -> Self {
        self.replies.get_mut().push_back(Err(err));
        self
    }

    pub async fn prompts(&self) -> Vec<String> {
        self.prompts.lock().await.clone()
    }

    pub async fn calls(&self) -> usize {
        self.prompts.lock().await.len()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn generate(&self, prompt: &str) -> Result<String, OracleError> {
        self.prompts.lock().await.push(prompt.to_string());
        self.replies
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(OracleError::Http("script exhausted".into())))
    }
}
