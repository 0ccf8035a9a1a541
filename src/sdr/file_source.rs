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


//! File playback driver.
//!
//! Replays a recorded IQ file as if it were a receiver. Tuning is fixed to
//! whatever the recording was made at; only the playback rate can change.
//!
//! Arguments: `file=<path>` (required), `rate=<sps>`, `freq=<hz>`,
//! `repeat=<bool>`, `throttle=<bool>`. Without `rate`, WAV files play at the
//! rate in their header and raw files at 1 Msps.

use std::path::PathBuf;

use futuresdr::blocks::Throttle;
use futuresdr::num_complex::Complex;
use futuresdr::runtime::Flowgraph;

use super::check_channel;
use super::iq_file_source::{self, IqFileSource, SampleFormat};
use crate::args::DeviceArgs;
use crate::error::{Result, SourceError};
use crate::ranges::{FreqRange, GainRange, MetaRange, Range};
use crate::source_iface::SourceInterface;

const DEFAULT_RATE: f64 = 1_000_000.0;
const DEFAULT_FREQ: f64 = 100_000_000.0;
const ANTENNA: &str = "file";
const NUM_CHANNELS: usize = 1;

/// Source that plays back an IQ recording.
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    format: SampleFormat,
    rate: f64,
    freq: f64,
    repeat: bool,
    throttle: bool,
    attached: bool,
}

impl FileSource {
    /// Create a file source from device arguments.
    ///
    /// The file is opened once here so a bad path fails at construction
    /// rather than when the flowgraph starts.
    pub fn new(args: &DeviceArgs) -> Result<Self> {
        let path = PathBuf::from(args.get("file").ok_or(SourceError::MissingArg("file"))?);
        let format = SampleFormat::from_path(&path);
        let header_rate = iq_file_source::probe(&path, format)?;

        // WAV recordings carry their own rate
        let rate = match args.parse::<f64>("rate")? {
            Some(rate) => rate,
            None => header_rate.map_or(DEFAULT_RATE, f64::from),
        };
        if rate <= 0.0 {
            return Err(SourceError::InvalidArgs {
                key: "rate".to_string(),
                reason: format!("sample rate must be positive, got {rate}"),
            });
        }

        let source = Self {
            path,
            format,
            rate,
            freq: args.parse::<f64>("freq")?.unwrap_or(DEFAULT_FREQ),
            repeat: args.flag("repeat")?.unwrap_or(true),
            throttle: args.flag("throttle")?.unwrap_or(true),
            attached: false,
        };

        log::info!(
            "File source: {} ({:?}), {:.3} Msps at {:.3} MHz, repeat={}, throttle={}",
            source.path.display(),
            source.format,
            source.rate / 1e6,
            source.freq / 1e6,
            source.repeat,
            source.throttle
        );

        Ok(source)
    }
}

impl SourceInterface for FileSource {
    fn attach(&mut self, fg: &mut Flowgraph) -> Result<usize> {
        if self.attached {
            return Err(SourceError::StreamTaken);
        }

        let reader = fg.add_block(IqFileSource::new(&self.path, self.format, self.repeat)?);
        let out = if self.throttle {
            let throttle = fg.add_block(Throttle::<Complex<f32>>::new(self.rate));
            fg.connect_stream(reader, "out", throttle, "in")?;
            throttle
        } else {
            reader
        };

        self.attached = true;
        Ok(out)
    }

    fn get_num_channels(&self) -> Result<usize> {
        Ok(NUM_CHANNELS)
    }

    fn get_sample_rates(&self) -> Result<MetaRange> {
        Ok(Range::from_value(self.rate).into())
    }

    fn set_sample_rate(&mut self, rate: f64) -> Result<f64> {
        if rate > 0.0 {
            if self.attached {
                log::warn!("Playback rate change to {rate} takes effect on the next attach");
            }
            self.rate = rate;
        }
        Ok(self.rate)
    }

    fn get_sample_rate(&self) -> Result<f64> {
        Ok(self.rate)
    }

    fn get_freq_range(&self, chan: usize) -> Result<FreqRange> {
        check_channel(chan, NUM_CHANNELS)?;
        Ok(Range::from_value(self.freq).into())
    }

    fn set_center_freq(&mut self, _freq: f64, chan: usize) -> Result<f64> {
        self.get_center_freq(chan)
    }

    fn get_center_freq(&self, chan: usize) -> Result<f64> {
        check_channel(chan, NUM_CHANNELS)?;
        Ok(self.freq)
    }

    fn set_freq_corr(&mut self, _ppm: f64, chan: usize) -> Result<f64> {
        self.get_freq_corr(chan)
    }

    fn get_freq_corr(&self, chan: usize) -> Result<f64> {
        check_channel(chan, NUM_CHANNELS)?;
        Ok(0.0)
    }

    fn get_gain_names(&self, chan: usize) -> Result<Vec<String>> {
        check_channel(chan, NUM_CHANNELS)?;
        Ok(Vec::new())
    }

    fn get_gain_range(&self, chan: usize) -> Result<GainRange> {
        check_channel(chan, NUM_CHANNELS)?;
        Ok(Range::from_value(0.0).into())
    }

    fn get_gain_range_named(&self, name: &str, chan: usize) -> Result<GainRange> {
        check_channel(chan, NUM_CHANNELS)?;
        Err(SourceError::UnknownGain(name.to_string()))
    }

    fn set_gain(&mut self, _gain: f64, chan: usize) -> Result<f64> {
        self.get_gain(chan)
    }

    fn set_gain_named(&mut self, _gain: f64, name: &str, chan: usize) -> Result<f64> {
        self.get_gain_named(name, chan)
    }

    fn get_gain(&self, chan: usize) -> Result<f64> {
        check_channel(chan, NUM_CHANNELS)?;
        Ok(0.0)
    }

    fn get_gain_named(&self, name: &str, chan: usize) -> Result<f64> {
        check_channel(chan, NUM_CHANNELS)?;
        Err(SourceError::UnknownGain(name.to_string()))
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
