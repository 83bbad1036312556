// src/scope/mod.rs
pub mod channel;
pub mod config;
pub mod decimate;
pub mod derive;
pub mod error;
pub mod plot;
pub mod render;
pub mod session;
pub mod simulated;
pub mod source;
pub mod trace;

pub use channel::ChannelAllocator;
pub use config::{CanvasConfig, ScopeConfig, SimulationConfig, TraceConfig, MAX_CANVAS_PX};
pub use decimate::{samples_per_pixel, Column, Decimation, DecimationCache};
pub use derive::Derivative;
pub use error::ScopeError;
pub use plot::{render_png, RasterSurface};
pub use render::{Color, CommandSurface, DrawCommand, DrawingSurface, Renderer, VerticalMap};
pub use session::{CaptureSession, TickReport};
pub use simulated::{SimulatedSource, DEFAULT_RING_SAMPLES, NCHANNELS};
pub use source::{ManualSource, Probe, ProbeKind, SampleBatch, SamplePeriod, SampleSource};
pub use trace::{SharedTrace, Trace, TraceKind, TraceStyle};
