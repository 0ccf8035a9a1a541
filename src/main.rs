// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


//! `osmosdr-probe`: open a source, apply settings, report its capabilities
//! and optionally record samples to a file.

use std::path::PathBuf;

use clap::Parser;
use futuresdr::anyhow::{Context, Result};
use futuresdr::blocks::FileSink;
use futuresdr::num_complex::Complex;
use futuresdr::runtime::{Flowgraph, Runtime};
use osmosdr_source::config::ProbeConfig;
use osmosdr_source::sdr::{list_devices, SampleLimit};
use osmosdr_source::{OsmoSdrSource, DEFAULT_CHANNEL};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(name = "osmosdr-probe")]
#[command(about = "Open an SDR source, tune it and report what it supports")]
struct Cli {
    /// Device arguments, e.g. "rtl=0" or "file=capture.cf32,rate=2.4e6"
    #[arg(short = 'a', long)]
    args: Option<String>,

    /// Center frequency in Hz
    #[arg(short = 'f', long)]
    freq: Option<f64>,

    /// Sample rate in samples per second
    #[arg(short = 's', long)]
    rate: Option<f64>,

    /// Overall gain in dB
    #[arg(short = 'g', long)]
    gain: Option<f64>,

    /// Gain of a named stage, as NAME=DB (repeatable)
    #[arg(long = "gain-stage", value_parser = parse_gain_stage)]
    gain_stages: Vec<(String, f64)>,

    /// Frequency correction in ppm
    #[arg(short = 'p', long)]
    ppm: Option<f64>,

    /// Antenna to select
    #[arg(long)]
    antenna: Option<String>,

    /// Channel to configure
    #[arg(short = 'c', long, default_value_t = DEFAULT_CHANNEL)]
    channel: usize,

    /// Record samples to this file (complex float32)
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Number of samples to record
    #[arg(short = 'n', long, default_value_t = 2_048_000)]
    samples: u64,

    /// List attached RTL-SDR devices and exit
    #[arg(long)]
    list: bool,

    /// Config file to use instead of the default location
    #[arg(long)]
    config: Option<PathBuf>,

    /// Store the effective settings back to the config file
    #[arg(long)]
    save_config: bool,
}

fn parse_gain_stage(s: &str) -> Result<(String, f64), String> {
    let (name, gain) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=DB, got '{s}'"))?;
    let gain = gain
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid gain '{gain}': {e}"))?;
    Ok((name.trim().to_string(), gain))
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    if cli.list {
        print_devices();
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => ProbeConfig::load_path(path).context("Failed to load config file")?,
        None => ProbeConfig::load().context("Failed to load config")?,
    };
    apply_overrides(&mut config, &cli);

    if cli.save_config {
        match &cli.config {
            Some(path) => config.save_path(path)?,
            None => config.save()?,
        }
        log::info!("Saved settings to {}", config_location(&cli));
    }

    let mut src = OsmoSdrSource::new(&config.device_args)
        .with_context(|| format!("Failed to open source '{}'", config.device_args))?;

    configure(&mut src, &config, &cli)?;
    report(&src, cli.channel)?;

    if let Some(path) = &cli.output {
        record(&mut src, path, cli.samples)?;
    }

    Ok(())
}

fn config_location(cli: &Cli) -> String {
    cli.config.clone().map_or_else(
        || {
            ProbeConfig::get_config_path()
                .map_or_else(|e| format!("<unknown: {e}>"), |p| p.display().to_string())
        },
        |p| p.display().to_string(),
    )
}

fn print_devices() {
    let devices = list_devices();
    if devices.is_empty() {
        println!("No RTL-SDR devices found");
        return;
    }
    for device in devices {
        println!("{}: {} (serial {})", device.index, device.name, device.serial);
    }
}

/// Command line values take precedence over stored ones.
fn apply_overrides(config: &mut ProbeConfig, cli: &Cli) {
    if let Some(args) = &cli.args {
        config.device_args.clone_from(args);
    }
    config.center_freq = cli.freq.or(config.center_freq);
    config.sample_rate = cli.rate.or(config.sample_rate);
    config.gain = cli.gain.or(config.gain);
    config.freq_corr = cli.ppm.or(config.freq_corr);
    if cli.antenna.is_some() {
        config.antenna.clone_from(&cli.antenna);
    }
}

fn configure(src: &mut OsmoSdrSource, config: &ProbeConfig, cli: &Cli) -> Result<()> {
    let chan = cli.channel;

    if let Some(rate) = config.sample_rate {
        let actual = src.set_sample_rate(rate)?;
        log::info!("Sample rate: requested {rate}, got {actual}");
    }
    if let Some(freq) = config.center_freq {
        let actual = src.set_center_freq(freq, chan)?;
        log::info!("Center frequency: requested {freq}, got {actual}");
    }
    if let Some(ppm) = config.freq_corr {
        let actual = src.set_freq_corr(ppm, chan)?;
        log::info!("Frequency correction: requested {ppm}, got {actual}");
    }
    if let Some(gain) = config.gain {
        let actual = src.set_gain(gain, chan)?;
        log::info!("Gain: requested {gain}, got {actual}");
    }
    for (name, gain) in &cli.gain_stages {
        let actual = src
            .set_gain_named(*gain, name, chan)
            .with_context(|| format!("Failed to set {name} gain"))?;
        log::info!("{name} gain: requested {gain}, got {actual}");
    }
    if let Some(antenna) = &config.antenna {
        let actual = src.set_antenna(antenna, chan)?;
        log::info!("Antenna: requested {antenna}, got {actual}");
    }

    Ok(())
}

fn report(src: &OsmoSdrSource, chan: usize) -> Result<()> {
    println!("Channels: {}", src.get_num_channels()?);
    println!("Sample rate: {} sps", src.get_sample_rate()?);
    print!("Supported sample rates:\n{}", src.get_sample_rates()?.to_pp_string());
    println!("Center frequency: {} Hz", src.get_center_freq(chan)?);
    print!("Frequency range:\n{}", src.get_freq_range(chan)?.to_pp_string());
    println!("Frequency correction: {} ppm", src.get_freq_corr(chan)?);
    println!("Gain: {} dB", src.get_gain(chan)?);
    print!("Gain range:\n{}", src.get_gain_range(chan)?.to_pp_string());

    for name in src.get_gain_names(chan)? {
        let range = src.get_gain_range_named(&name, chan)?;
        println!(
            "  {name}: {} dB (range {} .. {}, step {})",
            src.get_gain_named(&name, chan)?,
            range.start()?,
            range.stop()?,
            range.step()?
        );
    }

    println!(
        "Antenna: {} (available: {})",
        src.get_antenna(chan)?,
        src.get_antennas(chan)?.join(", ")
    );

    Ok(())
}

fn record(src: &mut OsmoSdrSource, path: &std::path::Path, samples: u64) -> Result<()> {
    log::info!("Recording {samples} samples to {}", path.display());

    let mut fg = Flowgraph::new();
    let out = src.connect(&mut fg)?;
    let limit = fg.add_block(SampleLimit::<Complex<f32>>::new(samples));
    let sink = fg.add_block(FileSink::<Complex<f32>>::new(
        path.to_str().context("Invalid output path")?,
    ));

    // Ends early if the source does (non-repeating file)
    fg.connect_stream(out, "out", limit, "in")?;
    fg.connect_stream(limit, "out", sink, "in")?;

    Runtime::new().run(fg)?;

    log::info!("Recording complete");
    Ok(())
}
