use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::scope::ScopeError;

/// What kind of endpoint a capture channel records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    Pin,
    Signal,
    Param,
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProbeKind::Pin => "pin",
            ProbeKind::Signal => "sig",
            ProbeKind::Param => "param",
        };
        f.write_str(name)
    }
}

/// A named endpoint in the control system that can be sampled.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Probe {
    #[serde(default = "default_probe_kind")]
    pub kind: ProbeKind,
    pub name: String,
}

fn default_probe_kind() -> ProbeKind {
    ProbeKind::Pin
}

impl Probe {
    pub fn pin(name: impl Into<String>) -> Self {
        Self {
            kind: ProbeKind::Pin,
            name: name.into(),
        }
    }

    pub fn signal(name: impl Into<String>) -> Self {
        Self {
            kind: ProbeKind::Signal,
            name: name.into(),
        }
    }

    pub fn param(name: impl Into<String>) -> Self {
        Self {
            kind: ProbeKind::Param,
            name: name.into(),
        }
    }
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.name)
    }
}

/// Nominal period of the real-time thread the capture function runs in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SamplePeriod {
    nanos: u64,
}

impl SamplePeriod {
    pub fn from_nanos(nanos: u64) -> Result<Self, ScopeError> {
        if nanos == 0 {
            return Err(ScopeError::InvalidPeriod);
        }
        Ok(Self { nanos })
    }

    pub fn from_secs_f64(secs: f64) -> Result<Self, ScopeError> {
        if !secs.is_finite() || secs <= 0.0 {
            return Err(ScopeError::InvalidPeriod);
        }
        Self::from_nanos((secs * 1e9).round() as u64)
    }

    pub fn as_nanos(&self) -> u64 {
        self.nanos
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.nanos as f64 / 1e9
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_nanos(self.nanos)
    }
}

/// Samples drained from a source in one poll.
#[derive(Clone, Debug)]
pub struct SampleBatch {
    pub samples: Array2<f64>, // channels x samples
    /// Records lost since the previous poll because the source's ring was full.
    pub overruns: u64,
}

impl SampleBatch {
    pub fn empty(channels: usize) -> Self {
        Self {
            samples: Array2::zeros((channels, 0)),
            overruns: 0,
        }
    }

    /// Builds a batch from per-channel rows, which must all be the same length.
    pub fn from_channels(channels: Vec<Vec<f64>>, overruns: u64) -> Result<Self, ScopeError> {
        let expected = channels.first().map(Vec::len).unwrap_or(0);
        if let Some((channel, row)) = channels
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != expected)
        {
            return Err(ScopeError::RaggedBatch {
                channel,
                expected,
                actual: row.len(),
            });
        }
        let samples =
            Array2::from_shape_fn((channels.len(), expected), |(c, i)| channels[c][i]);
        Ok(Self { samples, overruns })
    }

    pub fn num_channels(&self) -> usize {
        self.samples.nrows()
    }

    /// Number of samples per channel.
    pub fn len(&self) -> usize {
        self.samples.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn channel(&self, channel: usize) -> Option<ArrayView1<'_, f64>> {
        (channel < self.num_channels()).then(|| self.samples.row(channel))
    }
}

/// The acquisition side of the scope.
///
/// Implementations own a fixed pool of channel slots and a capture ring that a real-time
/// thread fills. Every call must return immediately; `get_samples` drains whatever has
/// accumulated since the last call.
pub trait SampleSource {
    fn channel_count(&self) -> usize;

    fn list_pins(&self) -> Vec<String>;
    fn list_signals(&self) -> Vec<String>;
    fn list_params(&self) -> Vec<String>;
    fn list_threads(&self) -> Vec<String>;

    /// Attach the capture function to the named thread, detaching it from any previous one.
    fn attach_thread(&mut self, thread: &str) -> Result<(), ScopeError>;
    /// Period in nanoseconds of the named thread, or of the attached one when `None`.
    fn thread_period_ns(&self, thread: Option<&str>) -> Result<u64, ScopeError>;

    /// Make `channel` record `probe`. Returns any history the source already holds for it.
    fn set_channel(&mut self, channel: usize, probe: &Probe) -> Result<Vec<f64>, ScopeError>;

    fn set_channel_pin(&mut self, channel: usize, pin: &str) -> Result<Vec<f64>, ScopeError> {
        self.set_channel(channel, &Probe::pin(pin))
    }

    fn set_channel_sig(&mut self, channel: usize, sig: &str) -> Result<Vec<f64>, ScopeError> {
        self.set_channel(channel, &Probe::signal(sig))
    }

    fn set_channel_param(&mut self, channel: usize, param: &str) -> Result<Vec<f64>, ScopeError> {
        self.set_channel(channel, &Probe::param(param))
    }

    fn channel_off(&mut self, channel: usize) -> Result<(), ScopeError>;

    fn start_capture(&mut self);
    fn stop_capture(&mut self);
    fn capture_state(&self) -> bool;

    /// Fails with [`ScopeError::PollWhileNotCapturing`] when capture is stopped.
    fn get_samples(&mut self) -> Result<SampleBatch, ScopeError>;

    /// Overruns since capture started.
    fn check_overflow(&self) -> u64;
}

/// In-memory source useful for tests and deterministic playback.
pub struct ManualSource {
    channels: usize,
    probes: Vec<Probe>,
    threads: Vec<(String, u64)>,
    attached: Option<String>,
    assigned: Vec<Option<Probe>>,
    queue: VecDeque<SampleBatch>,
    capturing: bool,
    overflow: u64,
    channels_off: Vec<usize>,
}

impl ManualSource {
    pub fn new(channels: usize, batches: impl IntoIterator<Item = SampleBatch>) -> Self {
        Self {
            channels,
            probes: Vec::new(),
            threads: Vec::new(),
            attached: None,
            assigned: vec![None; channels],
            queue: batches.into_iter().collect(),
            capturing: false,
            overflow: 0,
            channels_off: Vec::new(),
        }
    }

    pub fn with_probes(mut self, probes: impl IntoIterator<Item = Probe>) -> Self {
        self.probes.extend(probes);
        self
    }

    pub fn with_pins<I, S>(self, pins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_probes(pins.into_iter().map(Probe::pin))
    }

    pub fn with_thread(mut self, name: impl Into<String>, period_ns: u64) -> Self {
        self.threads.push((name.into(), period_ns));
        self
    }

    pub fn push_batch(&mut self, batch: SampleBatch) {
        self.queue.push_back(batch);
    }

    pub fn assigned(&self, channel: usize) -> Option<&Probe> {
        self.assigned.get(channel).and_then(Option::as_ref)
    }

    /// Every channel that received a `channel_off`, in call order.
    pub fn channels_off(&self) -> &[usize] {
        &self.channels_off
    }

    fn names(&self, kind: ProbeKind) -> Vec<String> {
        self.probes
            .iter()
            .filter(|p| p.kind == kind)
            .map(|p| p.name.clone())
            .collect()
    }

    fn check_channel(&self, channel: usize) -> Result<(), ScopeError> {
        if channel >= self.channels {
            return Err(ScopeError::ChannelOutOfRange {
                channel,
                capacity: self.channels,
            });
        }
        if self.capturing {
            return Err(ScopeError::ChannelBusy(channel));
        }
        Ok(())
    }
}

impl SampleSource for ManualSource {
    fn channel_count(&self) -> usize {
        self.channels
    }

    fn list_pins(&self) -> Vec<String> {
        self.names(ProbeKind::Pin)
    }

    fn list_signals(&self) -> Vec<String> {
        self.names(ProbeKind::Signal)
    }

    fn list_params(&self) -> Vec<String> {
        self.names(ProbeKind::Param)
    }

    fn list_threads(&self) -> Vec<String> {
        self.threads.iter().map(|(name, _)| name.clone()).collect()
    }

    fn attach_thread(&mut self, thread: &str) -> Result<(), ScopeError> {
        if !self.threads.iter().any(|(name, _)| name == thread) {
            return Err(ScopeError::NoSuchThread(thread.to_string()));
        }
        self.attached = Some(thread.to_string());
        Ok(())
    }

    fn thread_period_ns(&self, thread: Option<&str>) -> Result<u64, ScopeError> {
        let name = match thread {
            Some(name) => name,
            None => self.attached.as_deref().ok_or(ScopeError::NoThreadAttached)?,
        };
        self.threads
            .iter()
            .find(|(candidate, _)| candidate == name)
            .map(|(_, period)| *period)
            .ok_or_else(|| ScopeError::NoSuchThread(name.to_string()))
    }

    fn set_channel(&mut self, channel: usize, probe: &Probe) -> Result<Vec<f64>, ScopeError> {
        self.check_channel(channel)?;
        if !self.probes.contains(probe) {
            return Err(ScopeError::UnknownProbe {
                kind: probe.kind,
                name: probe.name.clone(),
            });
        }
        self.assigned[channel] = Some(probe.clone());
        Ok(Vec::new())
    }

    fn channel_off(&mut self, channel: usize) -> Result<(), ScopeError> {
        self.check_channel(channel)?;
        self.assigned[channel] = None;
        self.channels_off.push(channel);
        Ok(())
    }

    fn start_capture(&mut self) {
        self.capturing = true;
    }

    fn stop_capture(&mut self) {
        self.capturing = false;
    }

    fn capture_state(&self) -> bool {
        self.capturing
    }

    fn get_samples(&mut self) -> Result<SampleBatch, ScopeError> {
        if !self.capturing {
            return Err(ScopeError::PollWhileNotCapturing);
        }
        let batch = self
            .queue
            .pop_front()
            .unwrap_or_else(|| SampleBatch::empty(self.channels));
        self.overflow += batch.overruns;
        Ok(batch)
    }

    fn check_overflow(&self) -> u64 {
        self.overflow
    }
}
