//! Host page errors captured as telemetry data.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// Unix epoch milliseconds
    pub timestamp: i64,
}

impl ErrorRecord {
    pub fn exception(message: impl Into<String>, stack: Option<String>, timestamp: i64) -> Self {
        Self {
            message: message.into(),
            stack,
            timestamp,
        }
    }

    pub fn unhandled_rejection(reason: &str, timestamp: i64) -> Self {
        Self {
            message: format!("Unhandled promise rejection: {reason}"),
            stack: None,
            timestamp,
        }
    }
}
