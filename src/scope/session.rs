use std::sync::{Arc, Weak};

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::scope::channel::ChannelAllocator;
use crate::scope::config::ScopeConfig;
use crate::scope::error::ScopeError;
use crate::scope::source::{Probe, SampleSource, SamplePeriod};
use crate::scope::trace::{SharedTrace, Trace, TraceStyle};

/// What one tick did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Samples per channel received from the source.
    pub samples: usize,
    /// Records the source dropped since the previous tick.
    pub overruns: u64,
    /// Channels reclaimed because their traces were dropped.
    pub released: Vec<usize>,
}

/// Owns a [`SampleSource`] for the lifetime of one viewing session and routes its
/// channels into traces.
///
/// Traces are held weakly. Dropping the last handle to a captured trace frees its
/// channel on the next tick or bind; dropping a derived trace stops its updates.
pub struct CaptureSession<S: SampleSource> {
    source: S,
    channels: ChannelAllocator,
    derived: Vec<Weak<Mutex<Trace>>>,
    period: SamplePeriod,
    max_samples: usize,
    overruns: u64,
    ticks: u64,
}

impl<S: SampleSource> CaptureSession<S> {
    /// Attaches the capture function to `thread` and fixes the sample period from it.
    pub fn new(mut source: S, thread: &str, max_samples: usize) -> Result<Self, ScopeError> {
        source.attach_thread(thread)?;
        let period = SamplePeriod::from_nanos(source.thread_period_ns(None)?)?;
        let channels = ChannelAllocator::new(source.channel_count());
        info!(
            "capture session on {thread}: {} channels, period {:?}",
            channels.capacity(),
            period.as_duration()
        );
        Ok(Self {
            source,
            channels,
            derived: Vec::new(),
            period,
            max_samples,
            overruns: 0,
            ticks: 0,
        })
    }

    pub fn from_config(source: S, config: &ScopeConfig) -> Result<Self, ScopeError> {
        config.validate()?;
        Self::new(source, &config.thread, config.max_samples)
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn period(&self) -> SamplePeriod {
        self.period
    }

    pub fn max_samples(&self) -> usize {
        self.max_samples
    }

    /// Overruns reported by the source since the session began.
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn channel_capacity(&self) -> usize {
        self.channels.capacity()
    }

    pub fn channel_of(&self, trace: &SharedTrace) -> Option<usize> {
        self.channels.channel_of(trace)
    }

    /// Starts recording `probe` on a free channel. The returned handle is the only
    /// thing keeping the channel bound.
    pub fn add_probe(&mut self, probe: Probe, style: TraceStyle) -> Result<SharedTrace, ScopeError> {
        self.reap();
        let channel = self.channels.acquire()?;
        let history = self.while_stopped(|source| source.set_channel(channel, &probe))?;
        let mut trace = Trace::new(probe, style);
        trace.append(history);
        trace.trim(self.max_samples);
        let trace = trace.shared();
        self.channels.bind(&trace, channel)?;
        info!("{} bound to channel {channel}", trace.lock().label());
        Ok(trace)
    }

    pub fn add_pin(&mut self, pin: &str, style: TraceStyle) -> Result<SharedTrace, ScopeError> {
        self.add_probe(Probe::pin(pin), style)
    }

    pub fn add_signal(&mut self, sig: &str, style: TraceStyle) -> Result<SharedTrace, ScopeError> {
        self.add_probe(Probe::signal(sig), style)
    }

    pub fn add_param(&mut self, param: &str, style: TraceStyle) -> Result<SharedTrace, ScopeError> {
        self.add_probe(Probe::param(param), style)
    }

    /// Adds a trace holding the derivative of `source`, updated on every tick after
    /// the captured traces have been fed.
    pub fn add_derivative(&mut self, source: &SharedTrace, style: TraceStyle) -> SharedTrace {
        let derived = Trace::derivative_of(source, self.period.as_secs_f64(), style).shared();
        derived.lock().update();
        self.derived.push(Arc::downgrade(&derived));
        info!("derivative {} added", derived.lock().label());
        derived
    }

    /// Frees `trace`'s channel now instead of waiting for it to be dropped.
    pub fn release(&mut self, trace: &SharedTrace) -> Result<Option<usize>, ScopeError> {
        let Some(channel) = self.channels.release(trace) else {
            return Ok(None);
        };
        self.while_stopped(|source| source.channel_off(channel))?;
        info!("channel {channel} released");
        Ok(Some(channel))
    }

    /// Turns off the channels of dropped traces and forgets dropped derivatives.
    pub fn reap(&mut self) -> Vec<usize> {
        let freed = self.channels.reap();
        if !freed.is_empty() {
            self.while_stopped(|source| {
                for &channel in &freed {
                    match source.channel_off(channel) {
                        Ok(()) => info!("channel {channel} reclaimed"),
                        Err(err) => warn!("failed to turn off channel {channel}: {err}"),
                    }
                }
            });
        }
        self.derived.retain(|weak| weak.strong_count() > 0);
        freed
    }

    /// Sources only accept channel changes while stopped. Capture running on entry is
    /// restarted afterwards, which discards anything not yet polled.
    fn while_stopped<T>(&mut self, f: impl FnOnce(&mut S) -> T) -> T {
        let running = self.source.capture_state();
        if running {
            debug!("pausing capture to change channels");
            self.source.stop_capture();
        }
        let out = f(&mut self.source);
        if running {
            self.source.start_capture();
        }
        out
    }

    pub fn start(&mut self) {
        self.source.start_capture();
        info!("capture started");
    }

    pub fn is_capturing(&self) -> bool {
        self.source.capture_state()
    }

    /// Stops capture and releases every channel. Safe to call more than once.
    pub fn stop(&mut self) -> Result<(), ScopeError> {
        if self.source.capture_state() {
            self.source.stop_capture();
            info!("capture stopped after {} ticks", self.ticks);
        }
        let mut result = Ok(());
        for channel in self.channels.release_all() {
            if let Err(err) = self.source.channel_off(channel) {
                result = Err(err);
            }
        }
        self.derived.clear();
        result
    }

    /// Live traces in channel order, then derivatives in creation order.
    pub fn traces(&self) -> Vec<SharedTrace> {
        let mut traces: Vec<SharedTrace> = self
            .channels
            .bound()
            .into_iter()
            .map(|(_, trace)| trace)
            .collect();
        traces.extend(self.derived.iter().filter_map(Weak::upgrade));
        traces
    }

    /// Polls the source, reclaims channels of dropped traces, feeds bound traces,
    /// updates derivatives and trims everything. Drawing is left to the caller.
    pub fn tick(&mut self) -> Result<TickReport, ScopeError> {
        if !self.source.capture_state() {
            return Err(ScopeError::PollWhileNotCapturing);
        }
        let batch = self.source.get_samples()?;
        // reclaim after draining so the pause loses nothing
        let released = self.reap();
        self.ticks += 1;
        if batch.overruns > 0 {
            warn!(
                "capture overrun: {} records lost ({} total)",
                batch.overruns,
                self.overruns + batch.overruns
            );
        }
        self.overruns += batch.overruns;

        let bound = self.channels.bound();
        for (channel, trace) in &bound {
            if let Some(samples) = batch.channel(*channel) {
                trace.lock().append(samples.iter().copied());
            }
        }
        let derived: Vec<SharedTrace> = self.derived.iter().filter_map(Weak::upgrade).collect();
        for trace in &derived {
            trace.lock().update();
        }
        for trace in bound.iter().map(|(_, trace)| trace).chain(&derived) {
            trace.lock().trim(self.max_samples);
        }
        debug!(
            "tick {}: {} samples into {} traces",
            self.ticks,
            batch.len(),
            bound.len() + derived.len()
        );
        Ok(TickReport {
            samples: batch.len(),
            overruns: batch.overruns,
            released,
        })
    }
}

impl<S: SampleSource> Drop for CaptureSession<S> {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!("failed to stop capture session: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::source::{ManualSource, SampleBatch};

    const PINS: [&str; 4] = ["a", "b", "c", "d"];

    fn session(batches: Vec<SampleBatch>) -> CaptureSession<ManualSource> {
        let source = ManualSource::new(PINS.len(), batches)
            .with_pins(PINS)
            .with_thread("servo-thread", 100_000_000);
        CaptureSession::new(source, "servo-thread", 1000).unwrap()
    }

    fn batch(rows: &[&[f64]], overruns: u64) -> SampleBatch {
        SampleBatch::from_channels(rows.iter().map(|r| r.to_vec()).collect(), overruns).unwrap()
    }

    #[test]
    fn period_comes_from_attached_thread() {
        let session = session(Vec::new());
        assert_eq!(session.period().as_secs_f64(), 0.1);
        let source = ManualSource::new(1, Vec::new());
        assert!(matches!(
            CaptureSession::new(source, "servo-thread", 10),
            Err(ScopeError::NoSuchThread(_))
        ));
    }

    #[test]
    fn exhausting_channels_and_reclaiming_one() {
        let mut session = session(Vec::new());
        let mut traces: Vec<SharedTrace> = PINS
            .iter()
            .map(|pin| session.add_pin(pin, TraceStyle::default()).unwrap())
            .collect();
        assert!(matches!(
            session.add_pin("a", TraceStyle::default()),
            Err(ScopeError::ChannelsExhausted { capacity: 4 })
        ));

        drop(traces.remove(1));
        let replacement = session.add_pin("d", TraceStyle::default()).unwrap();
        assert_eq!(session.channel_of(&replacement), Some(1));
        assert_eq!(session.source().channels_off(), &[1]);
        assert!(session.add_pin("a", TraceStyle::default()).is_err());
    }

    #[test]
    fn failed_assignment_leaves_channel_free() {
        let mut session = session(Vec::new());
        assert!(matches!(
            session.add_pin("nope", TraceStyle::default()),
            Err(ScopeError::UnknownProbe { .. })
        ));
        let trace = session.add_pin("a", TraceStyle::default()).unwrap();
        assert_eq!(session.channel_of(&trace), Some(0));
    }

    #[test]
    fn overruns_accumulate() {
        let mut session = session(vec![
            batch(&[&[1.0]], 0),
            batch(&[&[2.0]], 2),
            batch(&[&[3.0]], 0),
        ]);
        let _trace = session.add_pin("a", TraceStyle::default()).unwrap();
        session.start();
        let reports: Vec<u64> = (0..3).map(|_| session.tick().unwrap().overruns).collect();
        assert_eq!(reports, vec![0, 2, 0]);
        assert_eq!(session.overruns(), 2);
        assert_eq!(session.source().check_overflow(), 2);
    }

    #[test]
    fn tick_feeds_derives_and_trims() {
        let mut session = session(vec![
            batch(&[&[0.0], &[5.0]], 0),
            batch(&[&[10.0, 10.0], &[6.0, 7.0]], 0),
        ]);
        session.max_samples = 2;
        let a = session.add_pin("a", TraceStyle::default()).unwrap();
        let b = session.add_pin("b", TraceStyle::default()).unwrap();
        let da = session.add_derivative(&a, TraceStyle::default());
        session.start();

        session.tick().unwrap();
        assert_eq!(a.lock().samples(), &[0.0]);
        assert_eq!(da.lock().samples(), &[0.0]);

        let report = session.tick().unwrap();
        assert_eq!(report.samples, 2);
        assert_eq!(a.lock().samples(), &[10.0, 10.0]);
        assert_eq!(b.lock().samples(), &[6.0, 7.0]);
        // [0, -100, 0] trimmed to the two most recent
        assert_eq!(da.lock().samples(), &[-100.0, 0.0]);
        assert_eq!(session.traces().len(), 3);
    }

    #[test]
    fn polling_while_stopped_is_an_error() {
        let mut session = session(Vec::new());
        assert!(matches!(session.tick(), Err(ScopeError::PollWhileNotCapturing)));
        session.start();
        assert!(session.tick().is_ok());
    }

    #[test]
    fn stop_is_idempotent_and_releases_everything() {
        let mut session = session(Vec::new());
        let a = session.add_pin("a", TraceStyle::default()).unwrap();
        let _b = session.add_pin("b", TraceStyle::default()).unwrap();
        session.start();
        session.stop().unwrap();
        session.stop().unwrap();
        assert!(!session.is_capturing());
        assert_eq!(session.source().channels_off(), &[0, 1]);
        assert_eq!(session.channel_of(&a), None);
        assert!(session.traces().is_empty());
    }

    #[test]
    fn explicit_release_and_dropped_derivative() {
        let mut session = session(vec![batch(&[&[1.0]], 0)]);
        let a = session.add_pin("a", TraceStyle::default()).unwrap();
        let da = session.add_derivative(&a, TraceStyle::default());
        assert_eq!(session.release(&a).unwrap(), Some(0));
        assert_eq!(session.release(&a).unwrap(), None);
        drop(da);
        session.start();
        let report = session.tick().unwrap();
        assert!(report.released.is_empty());
        assert!(session.traces().is_empty());
        assert!(a.lock().is_empty());
    }

    #[test]
    fn binding_while_capturing_pauses_capture() {
        let mut session = session(vec![batch(&[&[1.0], &[2.0]], 0)]);
        let a = session.add_pin("a", TraceStyle::default()).unwrap();
        session.start();
        let b = session.add_pin("b", TraceStyle::default()).unwrap();
        assert!(session.is_capturing());
        assert_eq!(session.source().assigned(1), Some(&Probe::pin("b")));
        session.tick().unwrap();
        assert_eq!(b.lock().samples(), &[2.0]);

        assert_eq!(session.release(&a).unwrap(), Some(0));
        assert!(session.is_capturing());
        assert_eq!(session.source().assigned(0), None);
    }

    #[test]
    fn dropped_trace_is_reclaimed_by_tick_while_capturing() {
        let mut session = session(vec![batch(&[&[1.0], &[2.0]], 0)]);
        let a = session.add_pin("a", TraceStyle::default()).unwrap();
        let _b = session.add_pin("b", TraceStyle::default()).unwrap();
        session.start();
        drop(a);
        let report = session.tick().unwrap();
        assert_eq!(report.released, vec![0]);
        assert_eq!(session.source().channels_off(), &[0]);
        assert!(session.is_capturing());
    }

    #[test]
    fn failed_poll_leaves_dropped_channels_for_the_next_tick() {
        let mut session = session(Vec::new());
        let a = session.add_pin("a", TraceStyle::default()).unwrap();
        drop(a);
        assert!(matches!(session.tick(), Err(ScopeError::PollWhileNotCapturing)));
        assert!(session.source().channels_off().is_empty());
        session.start();
        assert_eq!(session.tick().unwrap().released, vec![0]);
    }
}
