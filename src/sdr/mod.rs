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


//! Concrete source drivers.
//!
//! - [`RtlSource`]: RTL-SDR dongles (requires the `hardware` feature)
//! - [`FileSource`]: playback of recorded IQ files
//!
//! [`SampleLimit`] caps a stream at a sample count for recording.

pub mod file_source;
pub mod iq_file_source;
pub mod rtlsdr_source;
pub mod sample_limit;

pub use file_source::FileSource;
pub use iq_file_source::{IqFileSource, SampleFormat};
pub use rtlsdr_source::{list_devices, DeviceInfo, RtlConfig, RtlSource, TunerKind};
pub use sample_limit::SampleLimit;

use crate::error::{Result, SourceError};

/// Reject channel indices a driver does not have.
pub(crate) fn check_channel(chan: usize, available: usize) -> Result<()> {
    if chan < available {
        Ok(())
    } else {
        Err(SourceError::InvalidChannel { chan, available })
    }
}
