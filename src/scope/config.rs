use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::scope::error::ScopeError;
use crate::scope::render::Color;
use crate::scope::source::Probe;
use crate::scope::trace::TraceStyle;

/// Largest canvas side accepted from configuration.
pub const MAX_CANVAS_PX: u32 = 8192;

/// Everything needed to set up a viewing session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    /// Real-time thread the capture function is attached to.
    pub thread: String,
    pub tick_interval_ms: u64,
    /// Samples retained per trace after each tick.
    pub max_samples: usize,
    pub canvas: CanvasConfig,
    pub simulation: SimulationConfig,
    pub traces: Vec<TraceConfig>,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            thread: "servo-thread".to_string(),
            tick_interval_ms: 50,
            max_samples: 1000,
            canvas: CanvasConfig::default(),
            simulation: SimulationConfig::default(),
            traces: vec![
                TraceConfig::pin("charge-pump.out"),
                TraceConfig::pin("siggen.0.sine"),
                TraceConfig::pin("siggen.0.cosine"),
            ],
        }
    }
}

impl ScopeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScopeError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ScopeError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ScopeError> {
        if self.max_samples == 0 {
            return Err(ScopeError::InvalidConfig("max_samples must be at least 1".into()));
        }
        if self.tick_interval_ms == 0 {
            return Err(ScopeError::InvalidConfig(
                "tick_interval_ms must be at least 1".into(),
            ));
        }
        let canvas = 1..=MAX_CANVAS_PX;
        if !canvas.contains(&self.canvas.width) || !canvas.contains(&self.canvas.height) {
            return Err(ScopeError::InvalidConfig(format!(
                "canvas must be between 1 and {MAX_CANVAS_PX} pixels on each side"
            )));
        }
        if !(self.canvas.horizontal_calibration.is_finite()
            && self.canvas.horizontal_calibration > 0.0)
        {
            return Err(ScopeError::InvalidConfig(
                "horizontal_calibration must be a positive number".into(),
            ));
        }
        if self.simulation.ring_samples < 2 {
            return Err(ScopeError::InvalidConfig(
                "ring_samples must leave room for at least one record".into(),
            ));
        }
        if self.simulation.period_ns == 0 {
            return Err(ScopeError::InvalidPeriod);
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasConfig {
    pub width: u32,
    pub height: u32,
    /// Minimum width and height for the dotted sub-grid.
    pub fine_grid_min_px: u32,
    /// Samples spanned by the canvas width when a trace's `hscale` is 1.
    pub horizontal_calibration: f64,
    pub line_width: f64,
    pub background: Color,
    pub reticle: Color,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fine_grid_min_px: 300,
            horizontal_calibration: 1000.0,
            line_width: 1.0,
            background: Color::BLACK,
            reticle: Color::WHITE,
        }
    }
}

/// Settings for the built-in simulated source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub period_ns: u64,
    pub ring_samples: usize,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            period_ns: 1_000_000,
            ring_samples: 4000,
            seed: 0x5C0FE,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TraceConfig {
    pub probe: Probe,
    #[serde(default = "default_hscale")]
    pub hscale: f64,
    #[serde(default = "default_vscale")]
    pub vscale: f64,
    #[serde(default)]
    pub voffset: f64,
    /// Falls back to the palette entry for the trace's position.
    #[serde(default)]
    pub color: Option<Color>,
    /// Also show the trace's first derivative.
    #[serde(default)]
    pub derivative: bool,
}

fn default_hscale() -> f64 {
    2.0
}

fn default_vscale() -> f64 {
    20.0
}

impl TraceConfig {
    pub fn pin(name: &str) -> Self {
        Self {
            probe: Probe::pin(name),
            hscale: default_hscale(),
            vscale: default_vscale(),
            voffset: 0.0,
            color: None,
            derivative: false,
        }
    }

    pub fn style(&self, index: usize) -> TraceStyle {
        TraceStyle {
            hscale: self.hscale,
            vscale: self.vscale,
            voffset: self.voffset,
            color: self.color.unwrap_or_else(|| Color::palette(index)),
        }
    }
}
