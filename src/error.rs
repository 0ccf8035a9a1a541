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


//! Error type shared by the source adapter and its drivers.

use thiserror::Error;

/// Errors raised by source drivers.
///
/// The adapter never creates these itself; whatever the driver returns is
/// handed back to the caller untouched.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("invalid device argument '{key}': {reason}")]
    InvalidArgs { key: String, reason: String },

    #[error("missing required device argument '{0}'")]
    MissingArg(&'static str),

    #[error("no matching device found: {0}")]
    DeviceNotFound(String),

    #[error("channel {chan} out of range (device has {available})")]
    InvalidChannel { chan: usize, available: usize },

    #[error("unknown gain stage '{0}'")]
    UnknownGain(String),

    #[error("range is empty")]
    EmptyRange,

    #[error("ranges are not monotonic")]
    NonMonotonicRange,

    #[error("device error: {0}")]
    Device(String),

    #[error("device worker thread is no longer running")]
    WorkerGone,

    #[error("sample stream already attached to a flowgraph")]
    StreamTaken,

    #[error("{0}")]
    Unsupported(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Wav(#[from] hound::Error),

    #[error(transparent)]
    Flowgraph(#[from] futuresdr::anyhow::Error),
}

/// Result alias used throughout the crate.
pub type Result<T, E = SourceError> = std::result::Result<T, E>;
