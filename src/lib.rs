//! Capture-and-decimation core of a live signal scope.
//!
//! A [`CaptureSession`] multiplexes the fixed channels of a [`SampleSource`] among
//! traces, feeds them on every tick and keeps derivatives in step. A [`Renderer`]
//! draws the reticle and each trace's decimated buffer onto any [`DrawingSurface`].
pub mod scope;

pub use scope::{
    render_png, CaptureSession, Color, DrawingSurface, Probe, Renderer, SampleSource, ScopeConfig,
    ScopeError, SharedTrace, SimulatedSource, Trace, TraceStyle,
};
