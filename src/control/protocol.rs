//! Newline-delimited JSON framing for the control socket.
//!
//! A request is `{"method": "exit", "params": [], "id": 1}`; the reply echoes the id and
//! carries either `result` (possibly null) or `error`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default)]
    pub id: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub result: Option<String>,
    pub error: Option<String>,
    pub id: Value,
}

impl Response {
    pub fn ok(id: Value, result: Option<String>) -> Self {
        Self {
            result,
            error: None,
            id,
        }
    }

    pub fn error(id: Value, message: impl Into<String>) -> Self {
        Self {
            result: None,
            error: Some(message.into()),
            id,
        }
    }

    pub fn into_result(self) -> Result<Option<String>, String> {
        match self.error {
            Some(message) => Err(message),
            None => Ok(self.result),
        }
    }
}

/// Serializes `value` as one line, including the trailing newline.
pub fn encode<T: Serialize>(value: &T) -> serde_json::Result<String> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    Ok(line)
}
