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


//! Uniform SDR source for FutureSDR flowgraphs.
//!
//! [`OsmoSdrSource`] is a thin front for a concrete receiver driver. It is
//! built from a device argument string, wires the driver's sample stream into
//! a flowgraph as a single `Complex<f32>` output, and forwards every control
//! call (sample rate, tuning, frequency correction, gain stages, antenna) to
//! the driver unchanged.
//!
//! Two drivers ship with the crate:
//!
//! - **RTL-SDR** (`rtl=<index|serial>`), behind the `hardware` feature
//! - **File playback** (`file=<path>`), for recorded `.cf32` or stereo `.wav`
//!
//! # Example
//!
//! ```no_run
//! use futuresdr::blocks::NullSink;
//! use futuresdr::num_complex::Complex;
//! use futuresdr::runtime::{Flowgraph, Runtime};
//! use osmosdr_source::OsmoSdrSource;
//!
//! # fn main() -> futuresdr::anyhow::Result<()> {
//! let mut src = OsmoSdrSource::new("rtl=0")?;
//! src.set_sample_rate(2.4e6)?;
//! src.set_center_freq(1_090e6, 0)?;
//! src.set_gain(40.0, 0)?;
//!
//! let mut fg = Flowgraph::new();
//! let out = src.connect(&mut fg)?;
//! let snk = fg.add_block(NullSink::<Complex<f32>>::new());
//! fg.connect_stream(out, "out", snk, "in")?;
//! Runtime::new().run(fg)?;
//! # Ok(())
//! # }
//! ```

pub mod args;
pub mod config;
pub mod error;
pub mod ranges;
pub mod sdr;
pub mod source;
pub mod source_iface;

pub use args::DeviceArgs;
pub use error::{Result, SourceError};
pub use ranges::{FreqRange, GainRange, MetaRange, Range};
pub use source::{make_source, OsmoSdrSource, SharedSource};
pub use source_iface::{SourceInterface, DEFAULT_CHANNEL};
