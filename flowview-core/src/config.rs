use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::navigator::{ScrollOrientation, DEFAULT_FOCUS_BIAS};
use crate::search::SearchOptions;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Page shown after a load that did not ask for one.
    pub default_page: usize,
    pub focus_bias: f32,
    pub scroll_orientation: ScrollOrientation,
    pub animate_navigation: bool,
    pub search: SearchOptions,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            default_page: 0,
            focus_bias: DEFAULT_FOCUS_BIAS,
            scroll_orientation: ScrollOrientation::default(),
            animate_navigation: true,
            search: SearchOptions::default(),
        }
    }
}

impl ViewerConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: ViewerConfig = toml::from_str(raw).context("failed to parse viewer config")?;
        config.search.max_results = config.search.effective_max_results();
        config.focus_bias = config.focus_bias.clamp(0.0, 1.0);
        Ok(config)
    }

    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        Self::from_toml_str(&raw).with_context(|| format!("invalid config file {:?}", path))
    }
}
