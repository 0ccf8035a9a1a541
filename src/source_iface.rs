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


//! Driver interface implemented by every concrete source.

use futuresdr::runtime::Flowgraph;

use crate::error::Result;
use crate::ranges::{FreqRange, GainRange, MetaRange};

/// Channel used when the caller does not care.
pub const DEFAULT_CHANNEL: usize = 0;

/// Capabilities of a receive-only SDR source.
///
/// Units: Hz for frequencies and sample rates, ppm for frequency correction,
/// dB for gains. Setters return the value actually applied by the device.
pub trait SourceInterface: Send {
    /// Add the blocks producing this source's samples to `fg`.
    ///
    /// Returns the id of the block whose `"out"` port carries
    /// `Complex<f32>` samples. A source can be attached once.
    fn attach(&mut self, fg: &mut Flowgraph) -> Result<usize>;

    fn get_num_channels(&self) -> Result<usize>;

    fn get_sample_rates(&self) -> Result<MetaRange>;
    fn set_sample_rate(&mut self, rate: f64) -> Result<f64>;
    fn get_sample_rate(&self) -> Result<f64>;

    fn get_freq_range(&self, chan: usize) -> Result<FreqRange>;
    fn set_center_freq(&mut self, freq: f64, chan: usize) -> Result<f64>;
    fn get_center_freq(&self, chan: usize) -> Result<f64>;

    fn set_freq_corr(&mut self, ppm: f64, chan: usize) -> Result<f64>;
    fn get_freq_corr(&self, chan: usize) -> Result<f64>;

    /// Names of the individually controllable gain stages.
    fn get_gain_names(&self, chan: usize) -> Result<Vec<String>>;
    /// Range of the overall gain.
    fn get_gain_range(&self, chan: usize) -> Result<GainRange>;
    /// Range of the gain stage `name`.
    fn get_gain_range_named(&self, name: &str, chan: usize) -> Result<GainRange>;
    fn set_gain(&mut self, gain: f64, chan: usize) -> Result<f64>;
    fn set_gain_named(&mut self, gain: f64, name: &str, chan: usize) -> Result<f64>;
    fn get_gain(&self, chan: usize) -> Result<f64>;
    fn get_gain_named(&self, name: &str, chan: usize) -> Result<f64>;

    fn get_antennas(&self, chan: usize) -> Result<Vec<String>>;
    fn set_antenna(&mut self, antenna: &str, chan: usize) -> Result<String>;
    fn get_antenna(&self, chan: usize) -> Result<String>;
}
