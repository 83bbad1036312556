use std::collections::VecDeque;

use log::warn;

use crate::scope::trace::SharedTrace;

/// Incremental first difference of another trace.
///
/// Progress is tracked against the source's absolute sample count, so trimming the
/// source's buffer between updates never causes a sample to be skipped silently or
/// processed twice.
#[derive(Debug)]
pub struct Derivative {
    source: SharedTrace,
    period_secs: f64,
    consumed: u64,
    last: Option<f64>,
}

impl Derivative {
    pub fn new(source: SharedTrace, period_secs: f64) -> Self {
        Self {
            source,
            period_secs,
            consumed: 0,
            last: None,
        }
    }

    pub fn source(&self) -> &SharedTrace {
        &self.source
    }

    pub fn period_secs(&self) -> f64 {
        self.period_secs
    }

    /// Absolute number of source samples consumed so far.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Appends one output per source sample that arrived since the last call and
    /// returns how many were appended.
    pub fn advance(&mut self, out: &mut VecDeque<f64>) -> usize {
        let source = self.source.lock();
        let produced = source.produced();
        let retained = source.samples();
        let first_retained = produced - retained.len() as u64;
        if self.consumed < first_retained {
            warn!(
                "{}: {} samples trimmed before the derivative saw them",
                source.label(),
                first_retained - self.consumed
            );
            self.consumed = first_retained;
            // the gap spans more than one period, so restart from a fresh seed
            self.last = None;
        }
        let skip = (self.consumed - first_retained) as usize;
        let before = out.len();
        for &sample in retained.iter().skip(skip) {
            match self.last {
                None => out.push_back(0.0),
                Some(last) => out.push_back((last - sample) / self.period_secs),
            }
            self.last = Some(sample);
        }
        self.consumed = produced;
        out.len() - before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::trace::{Trace, TraceStyle};
    use crate::scope::Probe;

    fn captured() -> SharedTrace {
        Trace::new(Probe::pin("siggen.0.sine"), TraceStyle::default()).shared()
    }

    #[test]
    fn tracks_source_growth_exactly() {
        let source = captured();
        let mut derivative = Derivative::new(source.clone(), 0.1);
        let mut out = VecDeque::new();

        source.lock().append([0.0]);
        assert_eq!(derivative.advance(&mut out), 1);
        assert_eq!(out, [0.0]);

        source.lock().append([10.0]);
        derivative.advance(&mut out);
        assert_eq!(out, [0.0, -100.0]);

        source.lock().append([10.0]);
        derivative.advance(&mut out);
        assert_eq!(out, [0.0, -100.0, 0.0]);

        assert_eq!(derivative.advance(&mut out), 0);
        assert_eq!(out.len(), 3);
        assert_eq!(derivative.consumed(), 3);
    }

    #[test]
    fn empty_source_seeds_nothing() {
        let source = captured();
        let mut derivative = Derivative::new(source, 0.1);
        let mut out = VecDeque::new();
        assert_eq!(derivative.advance(&mut out), 0);
        assert!(out.is_empty());
    }

    #[test]
    fn source_trimming_does_not_disturb_progress() {
        let source = captured();
        let mut derivative = Derivative::new(source.clone(), 1.0);
        let mut out = VecDeque::new();

        source.lock().append([1.0, 2.0, 3.0]);
        derivative.advance(&mut out);
        source.lock().trim(1);
        source.lock().append([5.0]);
        derivative.advance(&mut out);
        assert_eq!(out, [0.0, -1.0, -1.0, -2.0]);
    }

    #[test]
    fn gap_after_trim_reseeds() {
        let source = captured();
        let mut derivative = Derivative::new(source.clone(), 1.0);
        let mut out = VecDeque::new();

        source.lock().append([1.0, 2.0]);
        derivative.advance(&mut out);
        source.lock().append([3.0, 4.0, 5.0, 9.0]);
        source.lock().trim(2);
        assert_eq!(derivative.advance(&mut out), 2);
        assert_eq!(out, [0.0, -1.0, 0.0, -4.0]);
        assert_eq!(derivative.consumed(), 6);
    }

    #[test]
    fn samples_trimmed_before_consumption_are_skipped() {
        let source = captured();
        let mut derivative = Derivative::new(source.clone(), 1.0);
        let mut out = VecDeque::new();

        source.lock().append([1.0, 2.0, 3.0, 4.0]);
        source.lock().trim(2);
        assert_eq!(derivative.advance(&mut out), 2);
        assert_eq!(out, [0.0, -1.0]);
        assert_eq!(derivative.consumed(), 4);
    }
}
