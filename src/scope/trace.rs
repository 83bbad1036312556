use std::collections::VecDeque;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::scope::decimate::{samples_per_pixel, Decimation, DecimationCache};
use crate::scope::derive::Derivative;
use crate::scope::render::Color;
use crate::scope::source::Probe;

/// A trace shared between the capture session, any derivatives of it, and the renderer.
pub type SharedTrace = Arc<Mutex<Trace>>;

/// Display parameters of a trace.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceStyle {
    /// Samples-to-pixels factor.
    pub hscale: f64,
    /// Amplitude covered by the full canvas height, per division.
    pub vscale: f64,
    /// Vertical offset in divisions.
    pub voffset: f64,
    pub color: Color,
}

impl Default for TraceStyle {
    fn default() -> Self {
        Self {
            hscale: 1.0,
            vscale: 1.0,
            voffset: 0.0,
            color: Color::WHITE,
        }
    }
}

#[derive(Debug)]
pub enum TraceKind {
    /// Fed directly by a capture channel.
    Captured { probe: Probe },
    /// Computed from another trace on every update.
    Derived(Derivative),
}

/// A bounded sample buffer plus how to draw it.
#[derive(Debug)]
pub struct Trace {
    label: String,
    kind: TraceKind,
    samples: VecDeque<f64>,
    produced: u64,
    style: TraceStyle,
    cache: Option<DecimationCache>,
    rebuilds: u64,
}

impl Trace {
    pub fn new(probe: Probe, style: TraceStyle) -> Self {
        Self::with_kind(probe.name.clone(), TraceKind::Captured { probe }, style)
    }

    /// A trace holding the first difference of `source`, scaled by `1 / period_secs`.
    pub fn derivative_of(source: &SharedTrace, period_secs: f64, style: TraceStyle) -> Self {
        let label = format!("d({})/dt", source.lock().label());
        Self::with_kind(
            label,
            TraceKind::Derived(Derivative::new(source.clone(), period_secs)),
            style,
        )
    }

    fn with_kind(label: String, kind: TraceKind, style: TraceStyle) -> Self {
        Self {
            label,
            kind,
            samples: VecDeque::new(),
            produced: 0,
            style,
            cache: None,
            rebuilds: 0,
        }
    }

    pub fn shared(self) -> SharedTrace {
        Arc::new(Mutex::new(self))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn kind(&self) -> &TraceKind {
        &self.kind
    }

    pub fn probe(&self) -> Option<&Probe> {
        match &self.kind {
            TraceKind::Captured { probe } => Some(probe),
            TraceKind::Derived(_) => None,
        }
    }

    pub fn is_derived(&self) -> bool {
        matches!(self.kind, TraceKind::Derived(_))
    }

    pub fn samples(&self) -> &VecDeque<f64> {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples ever appended, including those since trimmed away.
    pub fn produced(&self) -> u64 {
        self.produced
    }

    pub fn style(&self) -> &TraceStyle {
        &self.style
    }

    pub fn append<I>(&mut self, samples: I)
    where
        I: IntoIterator<Item = f64>,
    {
        let before = self.samples.len();
        self.samples.extend(samples);
        let added = self.samples.len() - before;
        if added > 0 {
            self.produced += added as u64;
            self.invalidate();
        }
    }

    /// Replaces the buffer. Counts as producing every new sample.
    pub fn set_data<I>(&mut self, samples: I)
    where
        I: IntoIterator<Item = f64>,
    {
        self.samples.clear();
        self.invalidate();
        self.append(samples);
    }

    /// Keeps only the `max` most recent samples.
    pub fn trim(&mut self, max: usize) {
        let len = self.samples.len();
        if len > max {
            self.samples.drain(..len - max);
            self.invalidate();
        }
    }

    /// Brings a derived trace up to date with its source. Captured traces are fed by
    /// the session, so this is a no-op for them.
    pub fn update(&mut self) -> usize {
        let added = match &mut self.kind {
            TraceKind::Derived(derivative) => derivative.advance(&mut self.samples),
            TraceKind::Captured { .. } => 0,
        };
        if added > 0 {
            self.produced += added as u64;
            self.invalidate();
        }
        added
    }

    pub fn set_style(&mut self, style: TraceStyle) {
        self.style = style;
        self.invalidate();
    }

    pub fn set_hscale(&mut self, hscale: f64) {
        self.style.hscale = hscale;
        self.invalidate();
    }

    pub fn set_vscale(&mut self, vscale: f64) {
        self.style.vscale = vscale;
        self.invalidate();
    }

    pub fn set_voffset(&mut self, voffset: f64) {
        self.style.voffset = voffset;
        self.invalidate();
    }

    pub fn set_color(&mut self, color: Color) {
        self.style.color = color;
        self.invalidate();
    }

    fn invalidate(&mut self) {
        self.cache = None;
    }

    /// Decimation of the buffer for a canvas `width` pixels wide, rebuilt only when
    /// the buffer, the style or the geometry changed since the last call.
    pub fn decimation(&mut self, width: u32, calibration: f64) -> Option<&Decimation> {
        let spp = samples_per_pixel(calibration, self.style.hscale, width)?;
        let stale = !matches!(&self.cache, Some(cache) if cache.is_valid_for(width, spp));
        if stale {
            self.rebuilds += 1;
            debug!(
                "{}: rebuilding decimation for {} samples at {} px ({:.3} samples/px)",
                self.label,
                self.samples.len(),
                width,
                spp
            );
            self.cache = Some(DecimationCache::build(&self.samples, width, spp));
        }
        self.cache.as_ref().map(DecimationCache::form)
    }

    pub fn cache_rebuilds(&self) -> u64 {
        self.rebuilds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace(values: &[f64]) -> Trace {
        let mut trace = Trace::new(Probe::pin("charge-pump.out"), TraceStyle::default());
        trace.append(values.iter().copied());
        trace
    }

    #[test]
    fn trim_keeps_most_recent_in_order() {
        let mut t = trace(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        t.trim(3);
        assert_eq!(t.samples(), &[3.0, 4.0, 5.0]);
        t.trim(10);
        assert_eq!(t.samples(), &[3.0, 4.0, 5.0]);
        t.trim(0);
        assert!(t.is_empty());
        assert_eq!(t.produced(), 5);
    }

    #[test]
    fn cache_is_reused_at_same_width() {
        let mut t = trace(&[0.0; 100]);
        assert!(t.decimation(640, 1000.0).is_some());
        assert!(t.decimation(640, 1000.0).is_some());
        assert_eq!(t.cache_rebuilds(), 1);
        t.decimation(320, 1000.0);
        assert_eq!(t.cache_rebuilds(), 2);
        t.decimation(320, 1000.0);
        assert_eq!(t.cache_rebuilds(), 2);
    }

    #[test]
    fn mutations_invalidate_cache() {
        let mut t = trace(&[1.0, 2.0]);
        t.decimation(640, 1000.0);
        t.append([3.0]);
        t.decimation(640, 1000.0);
        assert_eq!(t.cache_rebuilds(), 2);
        t.trim(2);
        t.decimation(640, 1000.0);
        assert_eq!(t.cache_rebuilds(), 3);
        t.set_color(Color::RED);
        t.decimation(640, 1000.0);
        assert_eq!(t.cache_rebuilds(), 4);
        // nothing dropped, nothing appended
        t.trim(2);
        t.append(std::iter::empty());
        t.decimation(640, 1000.0);
        assert_eq!(t.cache_rebuilds(), 4);
    }

    #[test]
    fn form_follows_samples_per_pixel() {
        // 1000 / 1 / width: dense while width < 1000, sparse from there up
        let mut t = trace(&[0.0; 50]);
        assert!(t.decimation(640, 1000.0).unwrap().is_dense());
        assert!(!t.decimation(1000, 1000.0).unwrap().is_dense());
        assert!(!t.decimation(2000, 1000.0).unwrap().is_dense());
        t.set_hscale(0.5);
        assert!(t.decimation(1000, 1000.0).unwrap().is_dense());
    }

    #[test]
    fn degenerate_geometry_skips_decimation() {
        let mut t = trace(&[1.0]);
        assert!(t.decimation(0, 1000.0).is_none());
        t.set_hscale(0.0);
        assert!(t.decimation(640, 1000.0).is_none());
        assert_eq!(t.cache_rebuilds(), 0);
    }

    #[test]
    fn derived_trace_follows_source() {
        let source = trace(&[]).shared();
        let derived = Trace::derivative_of(&source, 0.1, TraceStyle::default()).shared();
        assert_eq!(derived.lock().label(), "d(charge-pump.out)/dt");

        for values in [vec![0.0], vec![10.0], vec![10.0]] {
            source.lock().append(values);
            derived.lock().update();
        }
        assert_eq!(derived.lock().samples(), &[0.0, -100.0, 0.0]);
        assert_eq!(derived.lock().update(), 0);
        assert!(derived.lock().len() <= source.lock().len());
    }

    #[test]
    fn set_data_replaces_buffer() {
        let mut t = trace(&[1.0, 2.0]);
        t.set_data([7.0]);
        assert_eq!(t.samples(), &[7.0]);
        assert_eq!(t.produced(), 3);
    }
}
