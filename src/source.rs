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


//! The public source block.
//!
//! [`OsmoSdrSource`] presents one uniform source interface and forwards every
//! call to the driver it owns. It does not validate, convert or retry;
//! whatever the driver returns, including errors, is returned as is.

use std::sync::{Arc, Mutex};

use futuresdr::runtime::Flowgraph;

use crate::args::DeviceArgs;
use crate::error::Result;
use crate::ranges::{FreqRange, GainRange, MetaRange};
use crate::sdr::{FileSource, RtlSource};
use crate::source_iface::SourceInterface;

/// Shared handle to a source, for use from control code while the
/// flowgraph is running.
pub type SharedSource = Arc<Mutex<OsmoSdrSource>>;

/// Create a source from a device argument string and wrap it in a
/// shared handle.
pub fn make_source(args: &str) -> Result<SharedSource> {
    Ok(Arc::new(Mutex::new(OsmoSdrSource::new(args)?)))
}

/// Uniform SDR source delegating to a concrete driver.
pub struct OsmoSdrSource {
    src: Box<dyn SourceInterface>,
}

impl std::fmt::Debug for OsmoSdrSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OsmoSdrSource").finish_non_exhaustive()
    }
}

impl OsmoSdrSource {
    /// Build the driver described by `args`.
    ///
    /// A `file` key selects file playback; anything else opens an RTL-SDR
    /// dongle. The argument string is passed to the driver untouched.
    pub fn new(args: &str) -> Result<Self> {
        let parsed = DeviceArgs::new(args);

        let src: Box<dyn SourceInterface> = if parsed.contains("file") {
            log::info!("Creating file source ({args})");
            Box::new(FileSource::new(&parsed)?)
        } else {
            log::info!("Creating RTL-SDR source ({args})");
            Box::new(RtlSource::new(&parsed)?)
        };

        Ok(Self { src })
    }

    /// Wrap an already constructed driver.
    #[must_use]
    pub fn from_driver(src: Box<dyn SourceInterface>) -> Self {
        Self { src }
    }

    /// Wire the driver's sample output into `fg`.
    ///
    /// The returned block id exposes a single `"out"` port of
    /// `Complex<f32>`; the source itself takes no inputs.
    pub fn connect(&mut self, fg: &mut Flowgraph) -> Result<usize> {
        self.src.attach(fg)
    }

    pub fn get_num_channels(&self) -> Result<usize> {
        self.src.get_num_channels()
    }

    pub fn get_sample_rates(&self) -> Result<MetaRange> {
        self.src.get_sample_rates()
    }

    pub fn set_sample_rate(&mut self, rate: f64) -> Result<f64> {
        self.src.set_sample_rate(rate)
    }

    pub fn get_sample_rate(&self) -> Result<f64> {
        self.src.get_sample_rate()
    }

    pub fn get_freq_range(&self, chan: usize) -> Result<FreqRange> {
        self.src.get_freq_range(chan)
    }

    pub fn set_center_freq(&mut self, freq: f64, chan: usize) -> Result<f64> {
        self.src.set_center_freq(freq, chan)
    }

    pub fn get_center_freq(&self, chan: usize) -> Result<f64> {
        self.src.get_center_freq(chan)
    }

    pub fn set_freq_corr(&mut self, ppm: f64, chan: usize) -> Result<f64> {
        self.src.set_freq_corr(ppm, chan)
    }

    pub fn get_freq_corr(&self, chan: usize) -> Result<f64> {
        self.src.get_freq_corr(chan)
    }

    pub fn get_gain_names(&self, chan: usize) -> Result<Vec<String>> {
        self.src.get_gain_names(chan)
    }

    pub fn get_gain_range(&self, chan: usize) -> Result<GainRange> {
        self.src.get_gain_range(chan)
    }

    pub fn get_gain_range_named(&self, name: &str, chan: usize) -> Result<GainRange> {
        self.src.get_gain_range_named(name, chan)
    }

    pub fn set_gain(&mut self, gain: f64, chan: usize) -> Result<f64> {
        self.src.set_gain(gain, chan)
    }

    pub fn set_gain_named(&mut self, gain: f64, name: &str, chan: usize) -> Result<f64> {
        self.src.set_gain_named(gain, name, chan)
    }

    pub fn get_gain(&self, chan: usize) -> Result<f64> {
        self.src.get_gain(chan)
    }

    pub fn get_gain_named(&self, name: &str, chan: usize) -> Result<f64> {
        self.src.get_gain_named(name, chan)
    }

    pub fn get_antennas(&self, chan: usize) -> Result<Vec<String>> {
        self.src.get_antennas(chan)
    }

    pub fn set_antenna(&mut self, antenna: &str, chan: usize) -> Result<String> {
        self.src.set_antenna(antenna, chan)
    }

    pub fn get_antenna(&self, chan: usize) -> Result<String> {
        self.src.get_antenna(chan)
    }
}
