//! Facts about the hosting page and its network.

use serde::{Deserialize, Serialize};

/// Identity of the page a payload was collected on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageInfo {
    pub url: String,
    pub title: String,
    pub referrer: Option<String>,
}

/// Point-in-time connection information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInfo {
    /// e.g. "4g", "3g", "slow-2g"
    pub effective_type: String,
    /// Megabits per second
    pub downlink: f64,
    /// Round trip estimate in milliseconds
    pub rtt: u32,
    pub save_data: bool,
}

/// Read access to the hosting page.
pub trait PageContext: Send + Sync {
    fn page_info(&self) -> PageInfo;

    /// Platform-level opt-out. Overrides application consent.
    fn do_not_track(&self) -> bool;

    /// `None` when the platform exposes no connection information.
    fn network_info(&self) -> Option<NetworkInfo>;
}

/// Interpret the usual spellings of a do-not-track flag.
pub fn parse_do_not_track(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "yes" | "true"
    )
}
