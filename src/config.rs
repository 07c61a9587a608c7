//! Tunables shared by the waterfall layout code.
//!
//! Defaults match what the waterfall renders with out of the box. Hosts that draw the tree toggles
//! at a different size can load their own values from JSON.

use anyhow::{Context, Result};

use crate::types::TimePoint;

pub const TOGGLE_BUTTON_MAX_WIDTH: f64 = 30.0;
pub const TOGGLE_BUTTON_MARGIN_RIGHT: f64 = 16.0;
pub const TOGGLE_BORDER_BOX: f64 = TOGGLE_BUTTON_MAX_WIDTH + TOGGLE_BUTTON_MARGIN_RIGHT;

/// Width (as a fraction of the view window) given to zero-length bars so they stay visible.
pub const MIN_BAR_WIDTH: f64 = 0.00001;

/// Siblings further apart than this (in seconds) get a gap span between them.
pub const MISSING_INSTRUMENTATION_THRESHOLD: TimePoint = 0.1;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct WaterfallConfig {
    pub toggle_button_max_width: f64,
    pub toggle_button_margin_right: f64,
    pub missing_instrumentation_threshold: TimePoint,
}

impl Default for WaterfallConfig {
    fn default() -> Self {
        WaterfallConfig {
            toggle_button_max_width: TOGGLE_BUTTON_MAX_WIDTH,
            toggle_button_margin_right: TOGGLE_BUTTON_MARGIN_RIGHT,
            missing_instrumentation_threshold: MISSING_INSTRUMENTATION_THRESHOLD,
        }
    }
}

impl WaterfallConfig {
    /// Missing fields fall back to their defaults.
    pub fn from_json_str(json: &str) -> Result<WaterfallConfig> {
        let config: WaterfallConfig =
            serde_json::from_str(json).context("Failed to parse waterfall config")?;
        tracing::debug!(?config, "loaded waterfall config");
        Ok(config)
    }

    pub fn toggle_border_box(&self) -> f64 {
        self.toggle_button_max_width + self.toggle_button_margin_right
    }
}
