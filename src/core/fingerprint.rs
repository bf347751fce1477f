//! Device fingerprinting.
//!
//! Each side channel is an independent probe. A probe that is unsupported,
//! returns nothing, or panics contributes an empty value; the fingerprint is
//! whatever the remaining probes produced.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Boxed future returned by asynchronous probes.
pub type ProbeFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Fonts whose presence is tested by width comparison.
pub const CANDIDATE_FONTS: &[&str] = &[
    "Arial",
    "Arial Black",
    "Calibri",
    "Cambria",
    "Comic Sans MS",
    "Consolas",
    "Courier New",
    "Georgia",
    "Helvetica",
    "Impact",
    "Lucida Console",
    "Menlo",
    "Monaco",
    "Palatino",
    "Segoe UI",
    "Tahoma",
    "Times New Roman",
    "Trebuchet MS",
    "Verdana",
];

/// Generic families every platform resolves to some installed font.
pub const BASELINE_FONTS: &[&str] = &["monospace", "sans-serif", "serif"];

/// Upper bound on the audio context round trip.
pub const AUDIO_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

const CANVAS_HASH_LEN: usize = 32;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenInfo {
    pub width: u32,
    pub height: u32,
    pub color_depth: u32,
    pub pixel_ratio: f64,
}

/// Navigator-level facts that need no rendering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NavigatorFacts {
    pub timezone: Option<String>,
    pub language: Option<String>,
    pub platform: Option<String>,
    pub hardware_concurrency: Option<u32>,
    pub device_memory: Option<f64>,
    pub max_touch_points: Option<u32>,
}

/// Platform side channels used to build a fingerprint.
pub trait DeviceProbes: Send + Sync {
    /// Pixels of a fixed test drawing.
    fn canvas_pixels(&self) -> Option<Vec<u8>>;

    /// Unmasked WebGL vendor/renderer string.
    fn webgl_renderer(&self) -> Option<String>;

    /// Frequency-bin snapshot from an offline audio graph.
    fn audio_frequencies(&self) -> ProbeFuture<Option<Vec<f32>>>;

    /// Rendered width of the probe string in the given CSS font stack.
    fn text_width(&self, font_stack: &str) -> Option<f64>;

    fn plugins(&self) -> Option<Vec<String>>;

    fn screen(&self) -> Option<ScreenInfo>;

    fn navigator(&self) -> NavigatorFacts;
}

/// Immutable device snapshot taken once per activation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceFingerprint {
    pub canvas: String,
    pub webgl: String,
    pub audio: String,
    pub fonts: Vec<String>,
    pub plugins: Vec<String>,
    pub screen: ScreenInfo,
    pub timezone: String,
    pub language: String,
    pub platform: String,
    pub hardware_concurrency: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_memory: Option<f64>,
    pub max_touch_points: u32,
}

/// Run every probe and assemble the fingerprint.
pub async fn compute_fingerprint(probes: Arc<dyn DeviceProbes>) -> DeviceFingerprint {
    let audio = audio_fingerprint(&probes).await;

    let canvas = run_probe("canvas", || probes.canvas_pixels())
        .map(|pixels| canvas_hash(&pixels))
        .unwrap_or_default();
    let webgl = run_probe("webgl", || probes.webgl_renderer()).unwrap_or_default();
    let fonts = run_probe("fonts", || Some(detect_fonts(probes.as_ref()))).unwrap_or_default();
    let plugins = run_probe("plugins", || probes.plugins()).unwrap_or_default();
    let screen = run_probe("screen", || probes.screen()).unwrap_or_default();
    let nav = run_probe("navigator", || Some(probes.navigator())).unwrap_or_default();

    DeviceFingerprint {
        canvas,
        webgl,
        audio,
        fonts,
        plugins,
        screen,
        timezone: nav.timezone.unwrap_or_else(|| "UTC".to_string()),
        language: nav.language.unwrap_or_default(),
        platform: nav.platform.unwrap_or_default(),
        hardware_concurrency: nav.hardware_concurrency.unwrap_or(0),
        device_memory: nav.device_memory,
        max_touch_points: nav.max_touch_points.unwrap_or(0),
    }
}

/// Hex digest prefix of the rendered canvas pixels.
pub fn canvas_hash(pixels: &[u8]) -> String {
    let mut encoded = hex::encode(Sha256::digest(pixels));
    encoded.truncate(CANVAS_HASH_LEN);
    encoded
}

/// Sum of absolute frequency-bin magnitudes.
pub fn audio_signature(bins: &[f32]) -> String {
    let sum: f64 = bins
        .iter()
        .filter(|v| v.is_finite())
        .map(|v| f64::from(v.abs()))
        .sum();
    format!("{sum:.6}")
}

/// Fonts from [`CANDIDATE_FONTS`] whose rendering differs from a baseline.
pub fn detect_fonts(probes: &dyn DeviceProbes) -> Vec<String> {
    let baselines: Vec<(&str, f64)> = BASELINE_FONTS
        .iter()
        .filter_map(|base| probes.text_width(base).map(|w| (*base, w)))
        .collect();
    if baselines.is_empty() {
        return Vec::new();
    }

    CANDIDATE_FONTS
        .iter()
        .filter(|font| {
            baselines.iter().any(|(base, base_width)| {
                probes
                    .text_width(&format!("'{font}', {base}"))
                    .map_or(false, |w| (w - base_width).abs() > f64::EPSILON)
            })
        })
        .map(|font| font.to_string())
        .collect()
}

async fn audio_fingerprint(probes: &Arc<dyn DeviceProbes>) -> String {
    let future = match run_probe("audio", || Some(probes.audio_frequencies())) {
        Some(future) => future,
        None => return String::new(),
    };
    // Spawned so a panicking audio probe surfaces as a JoinError.
    let task = tokio::spawn(tokio::time::timeout(AUDIO_PROBE_TIMEOUT, future));
    match task.await {
        Ok(Ok(Some(bins))) => audio_signature(&bins),
        Ok(Ok(None)) => String::new(),
        Ok(Err(_)) => {
            tracing::debug!("Audio probe timed out");
            String::new()
        }
        Err(e) => {
            tracing::debug!("Audio probe failed: {e}");
            String::new()
        }
    }
}

fn run_probe<T>(name: &str, probe: impl FnOnce() -> Option<T>) -> Option<T> {
    match catch_unwind(AssertUnwindSafe(probe)) {
        Ok(value) => value,
        Err(_) => {
            tracing::debug!("Fingerprint probe '{name}' panicked");
            None
        }
    }
}
