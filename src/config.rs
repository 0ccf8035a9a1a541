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


//! Persistent settings for the probe tool.
//!
//! Stored as TOML via `confy` so repeated runs against the same dongle do not
//! need the full command line every time. Command line flags override
//! whatever is stored here.

use serde::{Deserialize, Serialize};

/// Application name used for the config directory
const APP_NAME: &str = "osmosdr-source";

/// Config file name (without extension)
const CONFIG_NAME: &str = "probe";

/// Default device arguments: first RTL-SDR dongle
pub const DEFAULT_DEVICE_ARGS: &str = "rtl=0";

/// Probe configuration stored in TOML format
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ProbeConfig {
    /// Configuration schema version
    #[serde(default = "default_config_version")]
    pub config_version: u32,

    /// Device argument string passed to the source
    #[serde(default = "default_device_args")]
    pub device_args: String,

    /// Center frequency in Hz to tune on startup
    #[serde(default)]
    pub center_freq: Option<f64>,

    /// Sample rate in samples/s to set on startup
    #[serde(default)]
    pub sample_rate: Option<f64>,

    /// Overall gain in dB; automatic gain when unset
    #[serde(default)]
    pub gain: Option<f64>,

    /// Frequency correction in ppm
    #[serde(default)]
    pub freq_corr: Option<f64>,

    /// Antenna to select
    #[serde(default)]
    pub antenna: Option<String>,
}

fn default_config_version() -> u32 {
    1
}

fn default_device_args() -> String {
    DEFAULT_DEVICE_ARGS.to_string()
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            device_args: default_device_args(),
            center_freq: None,
            sample_rate: None,
            gain: None,
            freq_corr: None,
            antenna: None,
        }
    }
}

impl ProbeConfig {
    /// Load configuration from disk, creating it with defaults if missing
    pub fn load() -> Result<Self, confy::ConfyError> {
        confy::load(APP_NAME, CONFIG_NAME)
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<(), confy::ConfyError> {
        confy::store(APP_NAME, CONFIG_NAME, self)
    }

    /// Get the config file path for display to user
    pub fn get_config_path() -> Result<std::path::PathBuf, confy::ConfyError> {
        confy::get_configuration_file_path(APP_NAME, CONFIG_NAME)
    }

    /// Load from an explicit path (used for `--config`)
    pub fn load_path(path: &std::path::Path) -> Result<Self, confy::ConfyError> {
        confy::load_path(path)
    }

    /// Save to an explicit path
    pub fn save_path(&self, path: &std::path::Path) -> Result<(), confy::ConfyError> {
        confy::store_path(path, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = ProbeConfig::default();
        assert_eq!(config.config_version, 1);
        assert_eq!(config.device_args, "rtl=0");
        assert!(config.gain.is_none());
    }

    #[test]
    fn test_round_trip_through_file() {
        let path = std::env::temp_dir().join("osmosdr_source_probe_config.toml");
        let _ = std::fs::remove_file(&path);

        let config = ProbeConfig {
            device_args: "rtl=00000001,buflen=65536".to_string(),
            center_freq: Some(1_090_000_000.0),
            gain: Some(40.2),
            ..ProbeConfig::default()
        };
        config.save_path(&path).unwrap();

        assert_eq!(ProbeConfig::load_path(&path).unwrap(), config);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: ProbeConfig = toml_from_str("center_freq = 144800000.0\n");
        assert_eq!(config.device_args, DEFAULT_DEVICE_ARGS);
        assert_eq!(config.center_freq, Some(144_800_000.0));
    }

    fn toml_from_str(contents: &str) -> ProbeConfig {
        let path = std::env::temp_dir().join("osmosdr_source_partial_config.toml");
        std::fs::write(&path, contents).unwrap();
        let config = ProbeConfig::load_path(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        config
    }
}
