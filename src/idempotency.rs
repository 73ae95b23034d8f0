use crate::models::ImportResponse;
use redis::AsyncCommands;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

const KEY_PREFIX: &str = "resale:import:";

/// Replays successful import responses per `Idempotency-Key`: Redis when
/// configured, otherwise a process-local map.
pub enum IdempotencyCache {
    Redis { client: redis::Client, ttl_secs: u64 },
    Local(Mutex<HashMap<String, ImportResponse>>),
}

impl IdempotencyCache {
    pub fn new(redis: Option<redis::Client>, ttl_secs: u64) -> Self {
        match redis {
            Some(client) => Self::Redis { client, ttl_secs },
            None => Self::Local(Mutex::new(HashMap::new())),
        }
    }

    pub async fn get(&self, key: &str) -> Option<ImportResponse> {
        match self {
            Self::Redis { client, .. } => redis_get(client, key).await,
            Self::Local(map) => map.lock().await.get(key).cloned(),
        }
    }

    pub async fn put(&self, key: String, response: &ImportResponse) {
        debug!(target = "resale.api", key = %key, "idempotent_response_stored");
        match self {
            Self::Redis { client, ttl_secs } => redis_set(client, &key, response, *ttl_secs).await,
            Self::Local(map) => {
                map.lock().await.insert(key, response.clone());
            }
        }
    }
}

async fn redis_get(client: &redis::Client, key: &str) -> Option<ImportResponse> {
    let mut conn = match client.get_multiplexed_async_connection().await {
        Ok(c) => c,
        Err(_) => return None,
    };
    let s: Option<String> = conn.get(format!("{KEY_PREFIX}{key}")).await.ok();
    s.and_then(|v| serde_json::from_str(&v).ok())
}

async fn redis_set(client: &redis::Client, key: &str, value: &ImportResponse, ttl_secs: u64) {
    if let Ok(mut conn) = client.get_multiplexed_async_connection().await
        && let Ok(json) = serde_json::to_string(value)
    {
        let _: Result<(), _> = conn
            .set_ex(format!("{KEY_PREFIX}{key}"), json, ttl_secs)
            .await;
    }
}
