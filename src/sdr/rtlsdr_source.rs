//! RTL-SDR driver.
//!
//! This module provides RTL-SDR device enumeration, the tuner capability
//! tables, and the [`RtlSource`] driver. Enable the `hardware` feature to
//! compile with RTL-SDR support.
//!
//! The device handle from the `rtlsdr` crate is not `Send`, so it is opened
//! and used entirely on a worker thread. Control calls are sent to that
//! thread over a channel and serviced between USB reads; samples travel to
//! the flowgraph through a ring buffer.

use futuresdr::num_complex::Complex;

use crate::args::DeviceArgs;
use crate::error::{Result, SourceError};
use crate::ranges::{FreqRange, GainRange, MetaRange, Range};

/// Default USB read size in bytes (256 KiB = 512 USB packets)
const DEFAULT_BUFLEN: usize = 262_144;

/// Default ring buffer size, in USB reads
const DEFAULT_BUFFERS: usize = 8;

/// USB packet size; read sizes must be a multiple of it
const USB_PACKET: usize = 512;

/// Sample rates known to work with the RTL2832U.
const SAMPLE_RATES: [f64; 8] = [
    250_000.0, 1_000_000.0, 1_024_000.0, 1_800_000.0, 1_920_000.0, 2_000_000.0, 2_048_000.0, 2_400_000.0,
];

/// E4000 IF gain stages as (start, stop, step) in dB.
const E4000_IF_STAGES: [(f64, f64, f64); 6] = [
    (-3.0, 6.0, 9.0),
    (0.0, 9.0, 3.0),
    (0.0, 9.0, 3.0),
    (0.0, 2.0, 1.0),
    (3.0, 15.0, 3.0),
    (3.0, 15.0, 3.0),
];

/// Information about an RTL-SDR device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Device index (0-based)
    pub index: u32,
    /// Device name (manufacturer + product)
    pub name: String,
    /// Device serial number
    pub serial: String,
}

/// Enumerate available RTL-SDR devices.
///
/// Returns a list of device information for all connected RTL-SDR dongles.
/// When the `hardware` feature is disabled, returns an empty list.
#[cfg(feature = "hardware")]
pub fn list_devices() -> Vec<DeviceInfo> {
    let count = rtlsdr::get_device_count();
    let mut devices = Vec::new();

    #[allow(clippy::cast_sign_loss, reason = "device indices are non-negative")]
    for i in 0..count {
        let name = rtlsdr::get_device_name(i);
        if let Ok(usb_strings) = rtlsdr::get_device_usb_strings(i) {
            devices.push(DeviceInfo {
                index: i as u32,
                name,
                serial: usb_strings.serial,
            });
        }
    }

    devices
}

/// Enumerate available RTL-SDR devices (stub when hardware feature is disabled).
#[cfg(not(feature = "hardware"))]
pub fn list_devices() -> Vec<DeviceInfo> {
    log::warn!("RTL-SDR hardware support not compiled (enable 'hardware' feature)");
    Vec::new()
}

/// Tuner chip fitted to the dongle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunerKind {
    E4000,
    Fc0012,
    Fc0013,
    Fc2580,
    R820T,
    R828D,
    Unknown,
}

impl TunerKind {
    /// Identify a tuner from its reported name, e.g. `"R820T"` or
    /// `"RTLSDR_TUNER_E4000"`.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        let name = name.to_ascii_uppercase();
        [
            ("E4000", Self::E4000),
            ("FC0012", Self::Fc0012),
            ("FC0013", Self::Fc0013),
            ("FC2580", Self::Fc2580),
            ("R820T", Self::R820T),
            ("R828D", Self::R828D),
        ]
        .into_iter()
        .find_map(|(tag, kind)| name.contains(tag).then_some(kind))
        .unwrap_or(Self::Unknown)
    }

    /// Tunable range of this tuner.
    #[must_use]
    pub fn freq_range(self) -> FreqRange {
        match self {
            Self::Fc0012 => MetaRange::single(22e6, 948.6e6, 0.0),
            Self::Fc0013 => MetaRange::single(22e6, 1.1e9, 0.0),
            Self::Fc2580 => [Range::continuous(146e6, 308e6), Range::continuous(438e6, 924e6)]
                .into_iter()
                .collect(),
            Self::R820T | Self::R828D => MetaRange::single(24e6, 1766e6, 0.0),
            // The E4000 has a temperature dependent gap around 1100-1250 MHz
            Self::E4000 | Self::Unknown => MetaRange::single(52e6, 2.2e9, 0.0),
        }
    }

    /// Independently controllable gain stages.
    #[must_use]
    pub fn gain_names(self) -> Vec<String> {
        let mut names = vec!["LNA".to_string()];
        if self == Self::E4000 {
            names.push("IF".to_string());
        }
        names
    }
}

/// Discrete sample rates supported by the driver.
#[must_use]
pub fn sample_rates() -> MetaRange {
    SAMPLE_RATES.into_iter().map(Range::from_value).collect()
}

/// Range of the combined E4000 IF gain.
#[must_use]
pub fn if_gain_range() -> GainRange {
    MetaRange::single(3.0, 56.0, 1.0)
}

/// LNA gain range from the tuner's gain table (tenths of a dB).
#[must_use]
pub fn lna_gain_range(tenths: &[i32]) -> GainRange {
    if tenths.is_empty() {
        return Range::from_value(0.0).into();
    }
    tenths
        .iter()
        .map(|&g| Range::from_value(f64::from(g) / 10.0))
        .collect()
}

/// Spread a requested IF gain over the six E4000 IF stages.
///
/// Stages start at their minimum. Working from the last stage to the first,
/// each stage takes the setting that brings the total closest to `gain`.
#[must_use]
pub fn distribute_if_gain(gain: f64) -> [f64; 6] {
    let mut gains = E4000_IF_STAGES.map(|(start, _, _)| start);

    for (i, &(start, stop, step)) in E4000_IF_STAGES.iter().enumerate().rev() {
        let others: f64 = gains
            .iter()
            .enumerate()
            .filter(|&(j, _)| j != i)
            .map(|(_, g)| g)
            .sum();

        let mut error = gain;
        let mut g = start;
        while g <= stop {
            let err = (gain - (others + g)).abs();
            if err < error {
                error = err;
                gains[i] = g;
            }
            g += step;
        }
    }

    gains
}

/// Convert interleaved unsigned 8-bit I/Q into Complex<f32> in -1.0..1.0.
#[cfg_attr(
    not(feature = "hardware"),
    allow(dead_code, reason = "only the hardware stream decodes samples")
)]
pub(crate) fn convert_samples(buf: &[u8], out: &mut Vec<Complex<f32>>) {
    out.extend(buf.chunks_exact(2).map(|iq| {
        // Center at 127.5: (sample - 127.5) / 127.5
        let i_val = (f32::from(iq[0]) - 127.5) / 127.5;
        let q_val = (f32::from(iq[1]) - 127.5) / 127.5;
        Complex::new(i_val, q_val)
    }));
}

/// Driver settings taken from the device arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtlConfig {
    /// Serial number or index of the dongle; `None` opens the first one
    pub device: Option<String>,
    /// USB read size in bytes
    pub buflen: usize,
    /// Ring buffer capacity, in reads
    pub buffers: usize,
}

impl RtlConfig {
    /// Read `rtl`, `buflen` and `buffers` from the argument list.
    ///
    /// The `rtl` value is matched against serial numbers first, then
    /// taken as an index.
    pub fn from_args(args: &DeviceArgs) -> Result<Self> {
        let device = args
            .get("rtl")
            .filter(|value| !value.is_empty())
            .map(str::to_string);

        let buflen = args.parse::<usize>("buflen")?.unwrap_or(DEFAULT_BUFLEN);
        if buflen == 0 || buflen % USB_PACKET != 0 {
            return Err(SourceError::InvalidArgs {
                key: "buflen".to_string(),
                reason: format!("{buflen} is not a non-zero multiple of {USB_PACKET}"),
            });
        }

        let buffers = args.parse::<usize>("buffers")?.unwrap_or(DEFAULT_BUFFERS);
        if buffers == 0 {
            return Err(SourceError::InvalidArgs {
                key: "buffers".to_string(),
                reason: "at least one buffer is required".to_string(),
            });
        }

        for ignored in ["direct_samp", "offset_tune"] {
            if args.contains(ignored) {
                log::warn!("RTL-SDR argument '{ignored}' is not supported, ignoring");
            }
        }

        Ok(Self {
            device,
            buflen,
            buffers,
        })
    }

    /// Ring buffer capacity in complex samples.
    #[must_use]
    pub fn ring_capacity(&self) -> usize {
        self.buffers * self.buflen / 2
    }
}

#[cfg(feature = "hardware")]
pub use hardware::RtlSource;

#[cfg(feature = "hardware")]
mod hardware {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc::{self, TryRecvError};
    use std::sync::Arc;
    use std::thread::JoinHandle;
    use std::time::Duration;

    use futuresdr::async_trait::async_trait;
    use futuresdr::num_complex::Complex;
    use futuresdr::runtime::Block;
    use futuresdr::runtime::BlockMeta;
    use futuresdr::runtime::BlockMetaBuilder;
    use futuresdr::runtime::Flowgraph;
    use futuresdr::runtime::Kernel;
    use futuresdr::runtime::MessageIo;
    use futuresdr::runtime::MessageIoBuilder;
    use futuresdr::runtime::StreamIo;
    use futuresdr::runtime::StreamIoBuilder;
    use futuresdr::runtime::WorkIo;
    use ringbuf::HeapRb;

    use super::{
        convert_samples, distribute_if_gain, if_gain_range, lna_gain_range, list_devices, sample_rates,
        RtlConfig, TunerKind,
    };
    use crate::args::DeviceArgs;
    use crate::error::{Result, SourceError};
    use crate::ranges::{FreqRange, GainRange, MetaRange};
    use crate::sdr::check_channel;
    use crate::source_iface::SourceInterface;

    type Consumer = ringbuf::Consumer<Complex<f32>, Arc<HeapRb<Complex<f32>>>>;
    type Producer = ringbuf::Producer<Complex<f32>, Arc<HeapRb<Complex<f32>>>>;
    /// Carries the settings read back after a command is applied.
    type Reply = mpsc::Sender<Result<DeviceState>>;

    /// How long to wait for the worker to open and configure the device
    const INIT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Number of receive channels on an RTL-SDR dongle.
    const NUM_CHANNELS: usize = 1;

    /// Antenna port name. RTL-SDR dongles have one input.
    const ANTENNA: &str = "RX";

    /// Sample rate the device is opened with.
    const DEFAULT_SAMPLE_RATE: u32 = 2_048_000;

    /// Center frequency the device is opened with.
    const DEFAULT_CENTER_FREQ: u32 = 100_000_000;

    /// Requests serviced by the worker thread.
    enum Command {
        SetSampleRate(u32, Reply),
        SetCenterFreq(u32, Reply),
        SetFreqCorr(i32, Reply),
        /// Switch to manual gain and set the tuner gain in tenths of a dB
        SetTunerGain(i32, Reply),
        /// Set one IF stage (1-based) in tenths of a dB
        SetIfGain { stage: i32, tenths: i32, reply: Reply },
    }

    /// Settings read back from the device.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct DeviceState {
        center_freq: u32,
        sample_rate: u32,
        freq_corr: i32,
        tuner_gain: i32,
    }

    /// What the worker reports once the device is open.
    struct DeviceCaps {
        tuner: TunerKind,
        gains: Vec<i32>,
        state: DeviceState,
    }

    fn device_error(context: &str, e: &rtlsdr::RTLSDRError) -> SourceError {
        SourceError::Device(format!("{context}: {e}"))
    }

    /// RTL-SDR source driver.
    pub struct RtlSource {
        commands: mpsc::Sender<Command>,
        consumer: Option<Consumer>,
        worker: Option<JoinHandle<()>>,
        /// Set by the worker if reading from the device fails
        error: Arc<AtomicBool>,
        /// Set to ask the worker to stop reading and close the device
        stop_flag: Arc<AtomicBool>,
        tuner: TunerKind,
        gains: Vec<i32>,
        if_gain: f64,
        /// Last settings read back by the worker
        state: DeviceState,
    }

    impl std::fmt::Debug for RtlSource {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("RtlSource")
                .field("tuner", &self.tuner)
                .field("gains", &self.gains)
                .field("if_gain", &self.if_gain)
                .field("state", &self.state)
                .finish_non_exhaustive()
        }
    }

    impl RtlSource {
        /// Open the dongle described by `args` and start streaming.
        pub fn new(args: &DeviceArgs) -> Result<Self> {
            let config = RtlConfig::from_args(args)?;
            let index = resolve_index(config.device.as_deref())?;

            log::info!("Opening RTL-SDR device {index}...");

            let rb = HeapRb::<Complex<f32>>::new(config.ring_capacity());
            let (producer, consumer) = rb.split();

            let error = Arc::new(AtomicBool::new(false));
            let stop_flag = Arc::new(AtomicBool::new(false));
            let (command_tx, command_rx) = mpsc::channel::<Command>();
            let (init_tx, init_rx) = mpsc::channel::<Result<DeviceCaps>>();

            let worker = Worker {
                index,
                buflen: config.buflen,
                producer,
                commands: command_rx,
                error: Arc::clone(&error),
                stop_flag: Arc::clone(&stop_flag),
            };
            let handle = std::thread::Builder::new()
                .name(format!("rtlsdr-{index}"))
                .spawn(move || worker.run(&init_tx))?;

            let caps = match init_rx.recv_timeout(INIT_TIMEOUT) {
                Ok(result) => result?,
                Err(_timeout) => {
                    stop_flag.store(true, Ordering::Relaxed);
                    return Err(SourceError::Device("RTL-SDR initialization timed out".to_string()));
                }
            };

            log::info!(
                "RTL-SDR device {index} ready: tuner {:?}, {} gain steps, ring {} samples",
                caps.tuner,
                caps.gains.len(),
                config.ring_capacity()
            );

            Ok(Self::with_worker(command_tx, consumer, Some(handle), error, stop_flag, caps))
        }

        fn with_worker(
            commands: mpsc::Sender<Command>,
            consumer: Consumer,
            worker: Option<JoinHandle<()>>,
            error: Arc<AtomicBool>,
            stop_flag: Arc<AtomicBool>,
            caps: DeviceCaps,
        ) -> Self {
            Self {
                commands,
                consumer: Some(consumer),
                worker,
                error,
                stop_flag,
                tuner: caps.tuner,
                gains: caps.gains,
                if_gain: 0.0,
                state: caps.state,
            }
        }

        /// Send a command and wait for the worker to apply it. The cached
        /// state is refreshed from the reply, so getters never wait on USB.
        fn request(&mut self, command: impl FnOnce(Reply) -> Command) -> Result<()> {
            let (reply_tx, reply_rx) = mpsc::channel();
            self.commands
                .send(command(reply_tx))
                .map_err(|_closed| SourceError::WorkerGone)?;
            self.state = reply_rx.recv().map_err(|_closed| SourceError::WorkerGone)??;
            Ok(())
        }

        fn is_e4000(&self) -> bool {
            self.tuner == TunerKind::E4000
        }

        fn set_if_gain(&mut self, gain: f64) -> Result<f64> {
            let stages = distribute_if_gain(gain);
            log::debug!("IF gain {gain} dB split over stages {stages:?}");

            for (stage, stage_gain) in (1..).zip(stages) {
                #[allow(clippy::cast_possible_truncation, reason = "stage gains are below 16 dB")]
                let tenths = (stage_gain * 10.0).round() as i32;
                self.request(|reply| Command::SetIfGain { stage, tenths, reply })?;
            }

            self.if_gain = gain;
            Ok(gain)
        }
    }

    /// Find the index of the dongle named by `device`.
    fn resolve_index(device: Option<&str>) -> Result<u32> {
        let devices = list_devices();
        let Some(device) = device else {
            return devices
                .first()
                .map(|d| d.index)
                .ok_or_else(|| SourceError::DeviceNotFound("no RTL-SDR devices attached".to_string()));
        };

        if let Some(found) = devices.iter().find(|d| d.serial == device) {
            return Ok(found.index);
        }

        device
            .parse::<u32>()
            .ok()
            .filter(|index| devices.iter().any(|d| d.index == *index))
            .ok_or_else(|| {
                SourceError::DeviceNotFound(format!(
                    "no RTL-SDR with serial or index '{device}' ({} attached)",
                    devices.len()
                ))
            })
    }

    impl Drop for RtlSource {
        fn drop(&mut self) {
            log::info!("Signaling RTL-SDR worker thread to stop...");
            self.stop_flag.store(true, Ordering::Relaxed);
            // Waits for at most one outstanding USB read
            if let Some(handle) = self.worker.take() {
                if handle.join().is_err() {
                    log::error!("RTL-SDR worker thread panicked");
                }
            }
        }
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "tuning values are range checked before conversion"
    )]
    impl SourceInterface for RtlSource {
        fn attach(&mut self, fg: &mut Flowgraph) -> Result<usize> {
            let consumer = self.consumer.take().ok_or(SourceError::StreamTaken)?;
            let block = RtlSdrStream::new(consumer, Arc::clone(&self.error));
            Ok(fg.add_block(block))
        }

        fn get_num_channels(&self) -> Result<usize> {
            Ok(NUM_CHANNELS)
        }

        fn get_sample_rates(&self) -> Result<MetaRange> {
            Ok(sample_rates())
        }

        fn set_sample_rate(&mut self, rate: f64) -> Result<f64> {
            if !(0.0..=f64::from(u32::MAX)).contains(&rate) {
                return Err(SourceError::Device(format!("sample rate {rate} is out of range")));
            }
            self.request(|reply| Command::SetSampleRate(rate.round() as u32, reply))?;
            self.get_sample_rate()
        }

        fn get_sample_rate(&self) -> Result<f64> {
            Ok(f64::from(self.state.sample_rate))
        }

        fn get_freq_range(&self, chan: usize) -> Result<FreqRange> {
            check_channel(chan, NUM_CHANNELS)?;
            Ok(self.tuner.freq_range())
        }

        fn set_center_freq(&mut self, freq: f64, chan: usize) -> Result<f64> {
            check_channel(chan, NUM_CHANNELS)?;
            if !(0.0..=f64::from(u32::MAX)).contains(&freq) {
                return Err(SourceError::Device(format!(
                    "center frequency {freq} Hz is out of range for RTL-SDR"
                )));
            }
            self.request(|reply| Command::SetCenterFreq(freq.round() as u32, reply))?;
            self.get_center_freq(chan)
        }

        fn get_center_freq(&self, chan: usize) -> Result<f64> {
            check_channel(chan, NUM_CHANNELS)?;
            Ok(f64::from(self.state.center_freq))
        }

        fn set_freq_corr(&mut self, ppm: f64, chan: usize) -> Result<f64> {
            check_channel(chan, NUM_CHANNELS)?;
            let ppm = ppm.round() as i32;
            // librtlsdr rejects setting the correction it already has
            if self.state.freq_corr != ppm {
                self.request(|reply| Command::SetFreqCorr(ppm, reply))?;
            }
            self.get_freq_corr(chan)
        }

        fn get_freq_corr(&self, chan: usize) -> Result<f64> {
            check_channel(chan, NUM_CHANNELS)?;
            Ok(f64::from(self.state.freq_corr))
        }

        fn get_gain_names(&self, chan: usize) -> Result<Vec<String>> {
            check_channel(chan, NUM_CHANNELS)?;
            Ok(self.tuner.gain_names())
        }

        fn get_gain_range(&self, chan: usize) -> Result<GainRange> {
            check_channel(chan, NUM_CHANNELS)?;
            Ok(lna_gain_range(&self.gains))
        }

        fn get_gain_range_named(&self, name: &str, chan: usize) -> Result<GainRange> {
            match name {
                "LNA" => self.get_gain_range(chan),
                "IF" if self.is_e4000() => {
                    check_channel(chan, NUM_CHANNELS)?;
                    Ok(if_gain_range())
                }
                _ => Err(SourceError::UnknownGain(name.to_string())),
            }
        }

        fn set_gain(&mut self, gain: f64, chan: usize) -> Result<f64> {
            let clipped = self.get_gain_range(chan)?.clip(gain, true)?;
            let tenths = (clipped * 10.0).round() as i32;
            self.request(|reply| Command::SetTunerGain(tenths, reply))?;
            self.get_gain(chan)
        }

        fn set_gain_named(&mut self, gain: f64, name: &str, chan: usize) -> Result<f64> {
            match name {
                "LNA" => self.set_gain(gain, chan),
                "IF" if self.is_e4000() => {
                    check_channel(chan, NUM_CHANNELS)?;
                    self.set_if_gain(gain)
                }
                _ => Err(SourceError::UnknownGain(name.to_string())),
            }
        }

        fn get_gain(&self, chan: usize) -> Result<f64> {
            check_channel(chan, NUM_CHANNELS)?;
            Ok(f64::from(self.state.tuner_gain) / 10.0)
        }

        fn get_gain_named(&self, name: &str, chan: usize) -> Result<f64> {
            match name {
                "LNA" => self.get_gain(chan),
                "IF" if self.is_e4000() => {
                    check_channel(chan, NUM_CHANNELS)?;
                    Ok(self.if_gain)
                }
                _ => Err(SourceError::UnknownGain(name.to_string())),
            }
        }

        fn get_antennas(&self, chan: usize) -> Result<Vec<String>> {
            check_channel(chan, NUM_CHANNELS)?;
            Ok(vec![ANTENNA.to_string()])
        }

        fn set_antenna(&mut self, _antenna: &str, chan: usize) -> Result<String> {
            self.get_antenna(chan)
        }

        fn get_antenna(&self, chan: usize) -> Result<String> {
            check_channel(chan, NUM_CHANNELS)?;
            Ok(ANTENNA.to_string())
        }
    }

    /// Owns the device on its own thread.
    struct Worker {
        index: u32,
        buflen: usize,
        producer: Producer,
        commands: mpsc::Receiver<Command>,
        error: Arc<AtomicBool>,
        stop_flag: Arc<AtomicBool>,
    }

    impl Worker {
        fn run(mut self, init_tx: &mpsc::Sender<Result<DeviceCaps>>) {
            let mut device = match self.open() {
                Ok((device, caps)) => {
                    let _ = init_tx.send(Ok(caps));
                    device
                }
                Err(e) => {
                    log::error!("Failed to open RTL-SDR device {}: {e}", self.index);
                    let _ = init_tx.send(Err(e));
                    return;
                }
            };

            let mut read_count = 0u64;
            let mut dropped = 0usize;
            let mut samples = Vec::with_capacity(self.buflen / 2);
            log::info!("Starting RTL-SDR read loop (buffer size: {} bytes)", self.buflen);

            while !self.stop_flag.load(Ordering::Relaxed) {
                if !self.service_commands(&mut device) {
                    break;
                }

                match device.read_sync(self.buflen) {
                    Ok(buf) => {
                        read_count += 1;
                        samples.clear();
                        convert_samples(&buf, &mut samples);

                        // If the ring is full the rest of this read is dropped
                        let pushed = self.producer.push_slice(&samples);
                        dropped += samples.len() - pushed;

                        if read_count % 100 == 0 {
                            log::debug!("RTL-SDR read #{read_count}: {} bytes, {dropped} samples dropped so far", buf.len());
                        }
                    }
                    Err(e) => {
                        log::error!("RTL-SDR read error after {read_count} successful reads: {e}");
                        self.error.store(true, Ordering::Relaxed);
                        break;
                    }
                }
            }

            log::info!("RTL-SDR read loop exited after {read_count} reads ({dropped} samples dropped)");

            // Device will be dropped here, which closes the USB connection
            drop(device);
            log::info!("RTL-SDR device {} closed", self.index);
        }

        fn open(&self) -> Result<(rtlsdr::RTLSDRDevice, DeviceCaps)> {
            #[allow(clippy::cast_possible_wrap, reason = "rtlsdr crate expects i32 indices")]
            let mut device = rtlsdr::open(self.index as i32)
                .map_err(|e| device_error(&format!("failed to open RTL-SDR device {}", self.index), &e))?;

            let tuner = TunerKind::from_name(&format!("{:?}", device.get_tuner_type()));
            let gains = device
                .get_tuner_gains()
                .map_err(|e| device_error("failed to read tuner gains", &e))?;

            device
                .set_sample_rate(DEFAULT_SAMPLE_RATE)
                .map_err(|e| device_error("failed to set sample rate", &e))?;
            device
                .set_center_freq(DEFAULT_CENTER_FREQ)
                .map_err(|e| device_error("failed to set center frequency", &e))?;
            device
                .set_tuner_gain_mode(false) // false = automatic
                .map_err(|e| device_error("failed to set gain mode", &e))?;
            device
                .reset_buffer()
                .map_err(|e| device_error("failed to reset buffer", &e))?;

            log::info!("RTL-SDR configured:");
            log::info!("  Tuner: {tuner:?}");
            log::info!("  Center frequency: {:.3} MHz", f64::from(DEFAULT_CENTER_FREQ) / 1e6);
            log::info!("  Sample rate: {:.3} MHz", f64::from(DEFAULT_SAMPLE_RATE) / 1e6);
            log::info!("  Gain: automatic ({} manual steps)", gains.len());

            let state = read_state(&mut device);
            Ok((device, DeviceCaps { tuner, gains, state }))
        }

        /// Apply every pending command. Returns false once the control
        /// handle is gone.
        fn service_commands(&self, device: &mut rtlsdr::RTLSDRDevice) -> bool {
            loop {
                match self.commands.try_recv() {
                    Ok(command) => handle_command(device, command),
                    Err(TryRecvError::Empty) => return true,
                    Err(TryRecvError::Disconnected) => return false,
                }
            }
        }
    }

    fn read_state(device: &mut rtlsdr::RTLSDRDevice) -> DeviceState {
        DeviceState {
            center_freq: device.get_center_freq(),
            sample_rate: device.get_sample_rate(),
            freq_corr: device.get_freq_correction(),
            tuner_gain: device.get_tuner_gain(),
        }
    }

    fn handle_command(device: &mut rtlsdr::RTLSDRDevice, command: Command) {
        let (result, reply) = match command {
            Command::SetSampleRate(rate, reply) => {
                log::debug!("Setting sample rate to {rate}");
                let result = device
                    .set_sample_rate(rate)
                    .and_then(|()| device.reset_buffer())
                    .map_err(|e| device_error("failed to set sample rate", &e));
                (result, reply)
            }
            Command::SetCenterFreq(freq, reply) => {
                log::debug!("Setting center frequency to {freq}");
                let result = device
                    .set_center_freq(freq)
                    .map_err(|e| device_error("failed to set center frequency", &e));
                (result, reply)
            }
            Command::SetFreqCorr(ppm, reply) => {
                let result = device
                    .set_freq_correction(ppm)
                    .map_err(|e| device_error("failed to set frequency correction", &e));
                (result, reply)
            }
            Command::SetTunerGain(tenths, reply) => {
                let result = device
                    .set_tuner_gain_mode(true) // true = manual
                    .and_then(|()| device.set_tuner_gain(tenths))
                    .map_err(|e| device_error("failed to set gain", &e));
                (result, reply)
            }
            Command::SetIfGain { stage, tenths, reply } => {
                let result = device
                    .set_tuner_if_gain(stage, tenths)
                    .map_err(|e| device_error("failed to set IF gain", &e));
                (result, reply)
            }
        };

        // A send only fails if the caller stopped waiting
        let _ = reply.send(result.map(|()| read_state(device)));
    }

    /// Flowgraph side of the driver: drains the ring buffer into the
    /// block's output.
    struct RtlSdrStream {
        consumer: Consumer,
        error: Arc<AtomicBool>,
    }

    impl RtlSdrStream {
        fn new(consumer: Consumer, error: Arc<AtomicBool>) -> Block {
            Block::new(
                BlockMetaBuilder::new("RtlSdrSource").build(),
                StreamIoBuilder::new()
                    .add_output::<Complex<f32>>("out")
                    .build(),
                MessageIoBuilder::new().build(),
                Self { consumer, error },
            )
        }
    }

    #[async_trait]
    impl Kernel for RtlSdrStream {
        async fn work(
            &mut self,
            io: &mut WorkIo,
            sio: &mut StreamIo,
            _mio: &mut MessageIo<Self>,
            _meta: &mut BlockMeta,
        ) -> futuresdr::anyhow::Result<()> {
            if self.error.load(Ordering::Relaxed) {
                log::error!("RTL-SDR worker thread encountered an error");
                return Err(futuresdr::anyhow::anyhow!("RTL-SDR read error occurred"));
            }

            let output = sio.output(0).slice::<Complex<f32>>();
            let n_produced = self.consumer.pop_slice(output);

            if n_produced > 0 {
                sio.output(0).produce(n_produced);
            } else {
                // Nothing buffered yet; yield so other blocks can run
                tokio::task::yield_now().await;
            }
            io.call_again = true;

            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        const INITIAL: DeviceState = DeviceState {
            center_freq: 100_000_000,
            sample_rate: 2_048_000,
            freq_corr: 0,
            tuner_gain: 0,
        };

        /// Driver wired to `commands` instead of a device thread.
        fn source(commands: mpsc::Sender<Command>) -> RtlSource {
            let (_producer, consumer) = HeapRb::<Complex<f32>>::new(16).split();
            let caps = DeviceCaps {
                tuner: TunerKind::R820T,
                gains: vec![0, 9, 14, 27, 496],
                state: INITIAL,
            };
            RtlSource::with_worker(
                commands,
                consumer,
                None,
                Arc::new(AtomicBool::new(false)),
                Arc::new(AtomicBool::new(false)),
                caps,
            )
        }

        #[test]
        fn test_getters_do_not_wait_on_worker() {
            let (tx, rx) = mpsc::channel();
            let src = source(tx);

            for _ in 0..10 {
                assert_eq!(src.get_center_freq(0).unwrap(), 100e6);
                assert_eq!(src.get_sample_rate().unwrap(), 2.048e6);
                assert_eq!(src.get_freq_corr(0).unwrap(), 0.0);
                assert_eq!(src.get_gain(0).unwrap(), 0.0);
            }
            assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        }

        #[test]
        fn test_setter_refreshes_cached_state() {
            let (tx, rx) = mpsc::channel::<Command>();
            let worker = std::thread::spawn(move || {
                let Ok(Command::SetCenterFreq(freq, reply)) = rx.recv() else {
                    panic!("expected a tuning command");
                };
                // Tuners land near, not exactly on, the request
                let state = DeviceState {
                    center_freq: freq - 10,
                    ..INITIAL
                };
                reply.send(Ok(state)).unwrap();
            });

            let mut src = source(tx);
            assert_eq!(src.set_center_freq(433_920_000.0, 0).unwrap(), 433_919_990.0);
            assert_eq!(src.get_center_freq(0).unwrap(), 433_919_990.0);
            worker.join().unwrap();
        }

        #[test]
        fn test_failed_command_keeps_state() {
            let (tx, rx) = mpsc::channel::<Command>();
            let worker = std::thread::spawn(move || {
                let Ok(Command::SetSampleRate(_, reply)) = rx.recv() else {
                    panic!("expected a sample rate command");
                };
                reply.send(Err(SourceError::Device("rejected".to_string()))).unwrap();
            });

            let mut src = source(tx);
            assert!(matches!(src.set_sample_rate(3.2e6), Err(SourceError::Device(_))));
            assert_eq!(src.get_sample_rate().unwrap(), 2.048e6);
            worker.join().unwrap();
        }

        #[test]
        fn test_worker_gone() {
            let (tx, rx) = mpsc::channel();
            drop(rx);
            let mut src = source(tx);

            assert!(matches!(src.set_center_freq(1e9, 0), Err(SourceError::WorkerGone)));
        }
    }
}

/// Stand-in when the hardware feature is disabled. It has no values, so
/// construction always fails.
#[cfg(not(feature = "hardware"))]
#[derive(Debug)]
pub enum RtlSource {}

#[cfg(not(feature = "hardware"))]
impl RtlSource {
    /// Create a new RTL-SDR source (stub when hardware feature is disabled).
    pub fn new(args: &DeviceArgs) -> Result<Self> {
        RtlConfig::from_args(args)?;
        log::error!("RTL-SDR source requires the 'hardware' feature");
        Err(SourceError::Unsupported(
            "RTL-SDR hardware support not compiled (enable 'hardware' feature)",
        ))
    }
}

#[cfg(not(feature = "hardware"))]
impl crate::source_iface::SourceInterface for RtlSource {
    fn attach(&mut self, _fg: &mut futuresdr::runtime::Flowgraph) -> Result<usize> {
        match *self {}
    }
    fn get_num_channels(&self) -> Result<usize> {
        match *self {}
    }
    fn get_sample_rates(&self) -> Result<MetaRange> {
        match *self {}
    }
    fn set_sample_rate(&mut self, _rate: f64) -> Result<f64> {
        match *self {}
    }
    fn get_sample_rate(&self) -> Result<f64> {
        match *self {}
    }
    fn get_freq_range(&self, _chan: usize) -> Result<FreqRange> {
        match *self {}
    }
    fn set_center_freq(&mut self, _freq: f64, _chan: usize) -> Result<f64> {
        match *self {}
    }
    fn get_center_freq(&self, _chan: usize) -> Result<f64> {
        match *self {}
    }
    fn set_freq_corr(&mut self, _ppm: f64, _chan: usize) -> Result<f64> {
        match *self {}
    }
    fn get_freq_corr(&self, _chan: usize) -> Result<f64> {
        match *self {}
    }
    fn get_gain_names(&self, _chan: usize) -> Result<Vec<String>> {
        match *self {}
    }
    fn get_gain_range(&self, _chan: usize) -> Result<GainRange> {
        match *self {}
    }
    fn get_gain_range_named(&self, _name: &str, _chan: usize) -> Result<GainRange> {
        match *self {}
    }
    fn set_gain(&mut self, _gain: f64, _chan: usize) -> Result<f64> {
        match *self {}
    }
    fn set_gain_named(&mut self, _gain: f64, _name: &str, _chan: usize) -> Result<f64> {
        match *self {}
    }
    fn get_gain(&self, _chan: usize) -> Result<f64> {
        match *self {}
    }
    fn get_gain_named(&self, _name: &str, _chan: usize) -> Result<f64> {
        match *self {}
    }
    fn get_antennas(&self, _chan: usize) -> Result<Vec<String>> {
        match *self {}
    }
    fn set_antenna(&mut self, _antenna: &str, _chan: usize) -> Result<String> {
        match *self {}
    }
    fn get_antenna(&self, _chan: usize) -> Result<String> {
        match *self {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tuner_from_name() {
        assert_eq!(TunerKind::from_name("R820T"), TunerKind::R820T);
        assert_eq!(TunerKind::from_name("RTLSDR_TUNER_E4000"), TunerKind::E4000);
        assert_eq!(TunerKind::from_name("fc0013"), TunerKind::Fc0013);
        assert_eq!(TunerKind::from_name("Unknown"), TunerKind::Unknown);
    }

    #[test]
    fn test_freq_ranges() {
        let r820t = TunerKind::R820T.freq_range();
        assert_eq!(r820t.start().unwrap(), 24e6);
        assert_eq!(r820t.stop().unwrap(), 1766e6);

        let fc2580 = TunerKind::Fc2580.freq_range();
        assert_eq!(fc2580.len(), 2);
        assert_eq!(fc2580.clip(350e6, false).unwrap(), 308e6);
    }

    #[test]
    fn test_gain_names() {
        assert_eq!(TunerKind::R820T.gain_names(), vec!["LNA"]);
        assert_eq!(TunerKind::E4000.gain_names(), vec!["LNA", "IF"]);
    }

    #[test]
    fn test_sample_rates() {
        let rates = sample_rates();
        assert_eq!(rates.len(), 8);
        assert_eq!(rates.start().unwrap(), 250e3);
        assert_eq!(rates.stop().unwrap(), 2.4e6);
        assert_eq!(rates.clip(2.3e6, false).unwrap(), 2.4e6);
    }

    #[test]
    fn test_lna_gain_range_clips_to_table() {
        let range = lna_gain_range(&[0, 9, 14, 27, 37, 77, 87, 125, 144, 157, 166, 197, 207, 229, 254, 280, 297, 328, 338, 364, 372, 386, 402, 421, 434, 439, 445, 480, 496]);
        assert_eq!(range.start().unwrap(), 0.0);
        assert_eq!(range.stop().unwrap(), 49.6);
        assert_eq!(range.clip(20.0, true).unwrap(), 19.7);
        assert_eq!(range.clip(60.0, true).unwrap(), 49.6);

        assert_eq!(lna_gain_range(&[]).values(), vec![0.0]);
    }

    #[test]
    fn test_distribute_if_gain() {
        let stages = distribute_if_gain(20.0);
        assert_eq!(stages, [-3.0, 0.0, 0.0, 0.0, 9.0, 15.0]);
        assert!((stages.iter().sum::<f64>() - 20.0).abs() <= 1.0);

        // The minimum request leaves every stage at its minimum
        assert_eq!(distribute_if_gain(3.0), [-3.0, 0.0, 0.0, 0.0, 3.0, 3.0]);
    }

    #[test]
    fn test_distributed_if_gain_stays_in_stage_ranges() {
        for request in 3..=56 {
            let stages = distribute_if_gain(f64::from(request));
            for (gain, (start, stop, _)) in stages.iter().zip(E4000_IF_STAGES) {
                assert!(*gain >= start && *gain <= stop, "request {request}: {stages:?}");
            }
        }
    }

    #[test]
    fn test_convert_samples() {
        let mut out = Vec::new();
        convert_samples(&[0, 255, 127, 128, 7], &mut out);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], Complex::new(-1.0, 1.0));
        assert!(out[1].re < 0.0 && out[1].re > -0.01);
        assert!(out[1].im > 0.0 && out[1].im < 0.01);
    }

    #[test]
    fn test_config_defaults() {
        let config = RtlConfig::from_args(&DeviceArgs::new("")).unwrap();
        assert_eq!(config.device, None);
        assert_eq!(config.buflen, 262_144);
        assert_eq!(config.ring_capacity(), 1024 * 1024);
    }

    #[test]
    fn test_config_device_and_buffers() {
        let config = RtlConfig::from_args(&DeviceArgs::new("rtl=2,buflen=65536,buffers=4")).unwrap();
        assert_eq!(config.device.as_deref(), Some("2"));
        assert_eq!(config.ring_capacity(), 4 * 32_768);

        let config = RtlConfig::from_args(&DeviceArgs::new("rtl=00000001")).unwrap();
        assert_eq!(config.device.as_deref(), Some("00000001"));

        let config = RtlConfig::from_args(&DeviceArgs::new("rtl")).unwrap();
        assert_eq!(config.device, None);
    }

    #[test]
    fn test_config_rejects_unaligned_buflen() {
        let err = RtlConfig::from_args(&DeviceArgs::new("buflen=1000")).unwrap_err();
        assert!(matches!(err, SourceError::InvalidArgs { ref key, .. } if key == "buflen"));
        assert!(RtlConfig::from_args(&DeviceArgs::new("buffers=0")).is_err());
    }

    #[cfg(not(feature = "hardware"))]
    #[test]
    fn test_stub_reports_unsupported() {
        assert!(matches!(
            RtlSource::new(&DeviceArgs::new("rtl=0")),
            Err(SourceError::Unsupported(_))
        ));
        assert!(list_devices().is_empty());
    }
}
