use std::collections::VecDeque;
use std::f64::consts::TAU;
use std::time::Instant;

use log::{debug, info};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::scope::config::SimulationConfig;
use crate::scope::error::ScopeError;
use crate::scope::source::{Probe, ProbeKind, SampleBatch, SampleSource};

/// Channels provided by the capture function.
pub const NCHANNELS: usize = 16;
/// Records in the capture ring unless configured otherwise.
pub const DEFAULT_RING_SAMPLES: usize = 4000;

const SIGGEN_HZ: f64 = 1.0;
const STEPGEN_HZ: f64 = 0.25;
const STEPGEN_MAX_VELOCITY: f64 = 2.0;
const STEPGEN_SCALE: f64 = 1000.0;

#[derive(Clone, Copy, Debug, PartialEq)]
enum Waveform {
    Sine,
    Cosine,
    Square,
    Triangle,
    Sawtooth,
    Constant(f64),
    ChargePump,
    Velocity,
    Position,
    Counts,
    PhaseA,
    PhaseB,
    Noise,
}

fn catalogue() -> Vec<(Probe, Waveform)> {
    use Waveform::*;
    vec![
        (Probe::pin("charge-pump.out"), ChargePump),
        (Probe::pin("siggen.0.amplitude"), Constant(1.0)),
        (Probe::pin("siggen.0.cosine"), Cosine),
        (Probe::pin("siggen.0.frequency"), Constant(SIGGEN_HZ)),
        (Probe::pin("siggen.0.offset"), Constant(0.0)),
        (Probe::pin("siggen.0.sawtooth"), Sawtooth),
        (Probe::pin("siggen.0.sine"), Sine),
        (Probe::pin("siggen.0.square"), Square),
        (Probe::pin("siggen.0.triangle"), Triangle),
        (Probe::pin("stepgen.0.counts"), Counts),
        (Probe::pin("stepgen.0.enable"), Constant(1.0)),
        (Probe::pin("stepgen.0.phase-A"), PhaseA),
        (Probe::pin("stepgen.0.phase-B"), PhaseB),
        (Probe::pin("stepgen.0.position-fb"), Position),
        (Probe::pin("stepgen.0.velocity-cmd"), Velocity),
        (Probe::signal("X-pos-fb"), Position),
        (Probe::signal("X-vel-cmd"), Velocity),
        (Probe::signal("sensor-noise"), Noise),
        (Probe::param("stepgen.0.maxaccel"), Constant(10.0)),
        (Probe::param("stepgen.0.position-scale"), Constant(STEPGEN_SCALE)),
    ]
}

impl Waveform {
    fn sample(self, t: f64, tick: u64, rng: &mut StdRng) -> f64 {
        let phase = (t * SIGGEN_HZ).fract();
        let w = TAU * STEPGEN_HZ;
        let position = STEPGEN_MAX_VELOCITY * (1.0 - (w * t).cos()) / w;
        let counts = (position * STEPGEN_SCALE).round() as i64;
        match self {
            Waveform::Sine => (TAU * phase).sin(),
            Waveform::Cosine => (TAU * phase).cos(),
            Waveform::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
            Waveform::Sawtooth => 2.0 * phase - 1.0,
            Waveform::Constant(value) => value,
            Waveform::ChargePump => (tick % 2) as f64,
            Waveform::Velocity => STEPGEN_MAX_VELOCITY * (w * t).sin(),
            Waveform::Position => position,
            Waveform::Counts => counts as f64,
            Waveform::PhaseA => f64::from(matches!(counts.rem_euclid(4), 1 | 2)),
            Waveform::PhaseB => f64::from(matches!(counts.rem_euclid(4), 2 | 3)),
            Waveform::Noise => rng.gen_range(-1.0..1.0),
        }
    }
}

/// Stand-in for the real-time capture function.
///
/// Each thread period the capture function writes one record of all channels into a
/// ring of `ring_samples` slots, one of which is always kept free. A record that
/// finds the ring full is dropped and counted as an overrun. Polling drains the ring.
pub struct SimulatedSource {
    catalogue: Vec<(Probe, Waveform)>,
    threads: Vec<(String, u64)>,
    attached: Option<usize>,
    assigned: [Option<Waveform>; NCHANNELS],
    ring: VecDeque<[f64; NCHANNELS]>,
    ring_capacity: usize,
    tick: u64,
    capturing: bool,
    overruns_total: u64,
    overruns_unreported: u64,
    wall_clock: Option<Instant>,
    clock_ticks: u64,
    rng: StdRng,
}

impl SimulatedSource {
    /// `ring_samples` is clamped to at least two so one record fits, `period_ns` to
    /// at least one.
    pub fn new(period_ns: u64, ring_samples: usize, seed: u64) -> Self {
        let period_ns = period_ns.max(1);
        let ring_capacity = ring_samples.max(2) - 1;
        Self {
            catalogue: catalogue(),
            threads: vec![
                ("servo-thread".to_string(), period_ns),
                ("base-thread".to_string(), (period_ns / 40).max(1)),
            ],
            attached: None,
            assigned: [None; NCHANNELS],
            ring: VecDeque::with_capacity(ring_capacity),
            ring_capacity,
            tick: 0,
            capturing: false,
            overruns_total: 0,
            overruns_unreported: 0,
            wall_clock: None,
            clock_ticks: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_config(config: &SimulationConfig) -> Self {
        Self::new(config.period_ns, config.ring_samples, config.seed)
    }

    /// Generate records from elapsed wall-clock time on every poll instead of
    /// only through [`SimulatedSource::advance`].
    pub fn with_wall_clock(mut self) -> Self {
        self.wall_clock = Some(Instant::now());
        self
    }

    /// Records the ring can hold before it overruns.
    pub fn ring_capacity(&self) -> usize {
        self.ring_capacity
    }

    pub fn pending(&self) -> usize {
        self.ring.len()
    }

    fn period_ns(&self) -> u64 {
        self.attached.map(|i| self.threads[i].1).unwrap_or(self.threads[0].1)
    }

    /// Runs the capture function for `periods` thread periods. Does nothing while
    /// capture is stopped.
    pub fn advance(&mut self, periods: u64) {
        if !self.capturing {
            return;
        }
        let period = self.period_ns() as f64 / 1e9;
        for _ in 0..periods {
            let t = self.tick as f64 * period;
            let tick = self.tick;
            self.tick += 1;
            if self.ring.len() >= self.ring_capacity {
                self.overruns_total += 1;
                self.overruns_unreported += 1;
                continue;
            }
            let mut record = [0.0; NCHANNELS];
            for (value, waveform) in record.iter_mut().zip(&self.assigned) {
                if let Some(waveform) = waveform {
                    *value = waveform.sample(t, tick, &mut self.rng);
                }
            }
            self.ring.push_back(record);
        }
    }

    fn catch_up(&mut self) {
        let Some(started) = self.wall_clock else {
            return;
        };
        let due = started.elapsed().as_nanos() as u64 / self.period_ns();
        let periods = due.saturating_sub(self.clock_ticks);
        self.clock_ticks = due;
        self.advance(periods);
    }

    fn check_channel(&self, channel: usize) -> Result<(), ScopeError> {
        if channel >= NCHANNELS {
            return Err(ScopeError::ChannelOutOfRange {
                channel,
                capacity: NCHANNELS,
            });
        }
        if self.capturing {
            return Err(ScopeError::ChannelBusy(channel));
        }
        Ok(())
    }

    fn names(&self, kind: ProbeKind) -> Vec<String> {
        self.catalogue
            .iter()
            .filter(|(probe, _)| probe.kind == kind)
            .map(|(probe, _)| probe.name.clone())
            .collect()
    }
}

impl SampleSource for SimulatedSource {
    fn channel_count(&self) -> usize {
        NCHANNELS
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
        let index = self
            .threads
            .iter()
            .position(|(name, _)| name == thread)
            .ok_or_else(|| ScopeError::NoSuchThread(thread.to_string()))?;
        if let Some(previous) = self.attached.take() {
            debug!("detaching capture from {}", self.threads[previous].0);
        }
        self.attached = Some(index);
        info!("capture attached to {thread}");
        Ok(())
    }

    fn thread_period_ns(&self, thread: Option<&str>) -> Result<u64, ScopeError> {
        match thread {
            Some(name) => self
                .threads
                .iter()
                .find(|(candidate, _)| candidate == name)
                .map(|(_, period)| *period)
                .ok_or_else(|| ScopeError::NoSuchThread(name.to_string())),
            None => self
                .attached
                .map(|i| self.threads[i].1)
                .ok_or(ScopeError::NoThreadAttached),
        }
    }

    fn set_channel(&mut self, channel: usize, probe: &Probe) -> Result<Vec<f64>, ScopeError> {
        self.check_channel(channel)?;
        let waveform = self
            .catalogue
            .iter()
            .find(|(candidate, _)| candidate == probe)
            .map(|(_, waveform)| *waveform)
            .ok_or_else(|| ScopeError::UnknownProbe {
                kind: probe.kind,
                name: probe.name.clone(),
            })?;
        self.assigned[channel] = Some(waveform);
        Ok(Vec::new())
    }

    fn channel_off(&mut self, channel: usize) -> Result<(), ScopeError> {
        self.check_channel(channel)?;
        self.assigned[channel] = None;
        Ok(())
    }

    fn start_capture(&mut self) {
        self.ring.clear();
        self.overruns_total = 0;
        self.overruns_unreported = 0;
        self.capturing = true;
        if self.wall_clock.is_some() {
            self.wall_clock = Some(Instant::now());
            self.clock_ticks = 0;
        }
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
        self.catch_up();
        let records: Vec<[f64; NCHANNELS]> = self.ring.drain(..).collect();
        let samples = Array2::from_shape_fn((NCHANNELS, records.len()), |(c, i)| records[i][c]);
        let overruns = std::mem::take(&mut self.overruns_unreported);
        Ok(SampleBatch { samples, overruns })
    }

    fn check_overflow(&self) -> u64 {
        self.overruns_total
    }
}
