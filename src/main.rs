// src/main.rs
use std::env;
use std::fs;
use std::path::PathBuf;
use std::thread;

use anyhow::{Context, Result};
use halscope::{render_png, CaptureSession, Renderer, ScopeConfig, SimulatedSource};
use log::{info, warn};

const DEFAULT_TICKS: u32 = 40;

struct Args {
    config: Option<PathBuf>,
    output: PathBuf,
    ticks: u32,
}

fn parse_args() -> Result<Args> {
    // halscope [config.json] [out.png] [ticks]
    let mut args = env::args().skip(1);
    let config = args.next().filter(|a| a != "-").map(PathBuf::from);
    let output = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("halscope.png"));
    let ticks = match args.next() {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("tick count '{raw}' is not a number"))?,
        None => DEFAULT_TICKS,
    };
    Ok(Args {
        config,
        output,
        ticks,
    })
}

fn main() -> Result<()> {
    env_logger::init();
    let args = parse_args()?;
    let config = match &args.config {
        Some(path) => ScopeConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ScopeConfig::default(),
    };

    let source = SimulatedSource::from_config(&config.simulation).with_wall_clock();
    let mut session =
        CaptureSession::from_config(source, &config).context("setting up capture session")?;

    // keep handles alive for as long as the traces should stay on screen
    let mut traces = Vec::new();
    for (index, trace) in config.traces.iter().enumerate() {
        let captured = session
            .add_probe(trace.probe.clone(), trace.style(index))
            .with_context(|| format!("adding {}", trace.probe))?;
        if trace.derivative {
            let style = trace.style(index + config.traces.len());
            traces.push(session.add_derivative(&captured, style));
        }
        traces.push(captured);
    }

    session.start();
    for _ in 0..args.ticks {
        thread::sleep(config.tick_interval());
        let report = session.tick().context("polling capture")?;
        if report.overruns > 0 {
            warn!("{} records lost this tick", report.overruns);
        }
    }

    let renderer = Renderer::from_config(&config.canvas);
    let png = render_png(
        &renderer,
        &session.traces(),
        config.canvas.width,
        config.canvas.height,
    )
    .context("rendering frame")?;
    fs::write(&args.output, png)
        .with_context(|| format!("writing {}", args.output.display()))?;
    info!(
        "wrote {} after {} ticks, {} overruns",
        args.output.display(),
        session.ticks(),
        session.overruns()
    );
    session.stop().context("stopping capture")?;
    drop(traces);
    Ok(())
}
