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


//! Device argument strings.
//!
//! Sources are configured with a string of `key=value` pairs separated by
//! commas or whitespace, e.g. `"rtl=0,buflen=65536"` or
//! `"file=/tmp/capture.cf32 rate=2.4e6 repeat=false"`. A key without `=` is
//! stored with an empty value. Later occurrences of a key replace earlier ones.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SourceError};

/// Parsed device arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceArgs {
    pairs: BTreeMap<String, String>,
}

impl DeviceArgs {
    /// Parse an argument string. Parsing itself never fails; malformed values
    /// are reported when a driver asks for them with [`DeviceArgs::parse`].
    #[must_use]
    pub fn new(args: &str) -> Self {
        let pairs = args
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|token| !token.is_empty())
            .filter_map(|token| {
                let (key, value) = token.split_once('=').unwrap_or((token, ""));
                let key = key.trim();
                (!key.is_empty()).then(|| (key.to_string(), value.trim().to_string()))
            })
            .collect();

        Self { pairs }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.pairs.contains_key(key)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.insert(key.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parse the value stored under `key`, or `None` if the key is absent.
    pub fn parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.get(key)
            .map(|value| {
                value.parse::<T>().map_err(|e| SourceError::InvalidArgs {
                    key: key.to_string(),
                    reason: format!("'{value}': {e}"),
                })
            })
            .transpose()
    }

    /// Parse a boolean flag. Accepts `true/false`, `yes/no`, `on/off`, `1/0`;
    /// a bare key counts as `true`.
    pub fn flag(&self, key: &str) -> Result<Option<bool>> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };

        match value.to_ascii_lowercase().as_str() {
            "" | "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            other => Err(SourceError::InvalidArgs {
                key: key.to_string(),
                reason: format!("'{other}' is not a boolean"),
            }),
        }
    }
}

impl FromStr for DeviceArgs {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl fmt::Display for DeviceArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.pairs {
            if !first {
                f.write_str(",")?;
            }
            first = false;
            if value.is_empty() {
                write!(f, "{key}")?;
            } else {
                write!(f, "{key}={value}")?;
            }
        }
        Ok(())
    }
}
