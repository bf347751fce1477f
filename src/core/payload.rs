//! The JSON document sent to the collection endpoint on every flush.

use crate::core::behavior::UserBehavior;
use crate::core::errors::ErrorRecord;
use crate::core::fingerprint::DeviceFingerprint;
use crate::core::page::{NetworkInfo, PageInfo};
use crate::core::performance::PerformanceMetrics;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct TelemetryPayload {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub fingerprint: Option<DeviceFingerprint>,
    pub behavior: UserBehavior,
    pub performance: PerformanceMetrics,
    pub network: Option<NetworkInfo>,
    pub errors: Vec<ErrorRecord>,
    /// ISO-8601 time the payload was assembled
    pub timestamp: String,
    pub page: PageInfo,
    pub consent_version: Option<String>,
    pub events_count: usize,
}

impl TelemetryPayload {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
