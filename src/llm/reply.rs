//! Turning an untrusted oracle reply into a JSON object.
//!
//! Models are asked for bare JSON but regularly wrap it in a markdown fence
//! anyway, so the fence is removed before parsing.

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReplyError {
    #[error("reply is empty")]
    Empty,
    #[error("reply is not valid json: {0}")]
    Malformed(String),
    #[error("reply is json but not an object")]
    NotAnObject,
}

/// Trims the reply and removes a surrounding ```/```json fence if present.
pub fn strip_code_fence(input: &str) -> String {
    let trimmed = input.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
    };
    let body = match body.rfind("```") {
        Some(idx) => &body[..idx],
        None => body,
    };
    body.trim().to_string()
}

pub fn parse_json_object(input: &str) -> Result<Map<String, Value>, ReplyError> {
    let cleaned = strip_code_fence(input);
    if cleaned.is_empty() {
        return Err(ReplyError::Empty);
    }
    match serde_json::from_str::<Value>(&cleaned) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ReplyError::NotAnObject),
        Err(err) => Err(ReplyError::Malformed(err.to_string())),
    }
}
