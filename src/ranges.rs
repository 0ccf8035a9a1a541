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


//! Value ranges reported by source drivers.
//!
//! A [`MetaRange`] is an ordered list of [`Range`]s. Drivers use it to
//! describe supported sample rates, tuning ranges and gain steps, which may be
//! continuous, stepped, or a set of discrete values.

use std::fmt;

use crate::error::{Result, SourceError};

/// A single `start..=stop` interval with an optional step.
///
/// A step of zero means the range is continuous.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range {
    start: f64,
    stop: f64,
    step: f64,
}

impl Range {
    /// Create a range covering `start..=stop` in increments of `step`.
    #[must_use]
    pub const fn new(start: f64, stop: f64, step: f64) -> Self {
        Self { start, stop, step }
    }

    /// Create a continuous range.
    #[must_use]
    pub fn continuous(start: f64, stop: f64) -> Self {
        Self::new(start, stop, 0.0)
    }

    /// Create a range holding exactly one value.
    #[must_use]
    pub fn from_value(value: f64) -> Self {
        Self::new(value, value, 0.0)
    }

    #[must_use]
    pub fn start(&self) -> f64 {
        self.start
    }

    #[must_use]
    pub fn stop(&self) -> f64 {
        self.stop
    }

    #[must_use]
    pub fn step(&self) -> f64 {
        self.step
    }

    #[allow(clippy::float_cmp, reason = "single-value ranges store identical bounds")]
    fn is_single_value(&self) -> bool {
        self.start == self.stop
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_single_value() {
            write!(f, "{}", self.start)
        } else {
            write!(f, "({}, {}, {})", self.start, self.stop, self.step)
        }
    }
}

/// An ordered collection of ranges.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetaRange {
    ranges: Vec<Range>,
}

/// Tuning range in Hz.
pub type FreqRange = MetaRange;

/// Gain range in dB.
pub type GainRange = MetaRange;

impl MetaRange {
    /// Create an empty meta range.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a meta range holding one sub-range.
    #[must_use]
    pub fn single(start: f64, stop: f64, step: f64) -> Self {
        Self {
            ranges: vec![Range::new(start, stop, step)],
        }
    }

    /// Append a sub-range.
    pub fn push(&mut self, range: Range) {
        self.ranges.push(range);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Range> {
        self.ranges.iter()
    }

    /// Smallest start across all sub-ranges.
    pub fn start(&self) -> Result<f64> {
        self.ranges
            .iter()
            .map(Range::start)
            .reduce(f64::min)
            .ok_or(SourceError::EmptyRange)
    }

    /// Largest stop across all sub-ranges.
    pub fn stop(&self) -> Result<f64> {
        self.ranges
            .iter()
            .map(Range::stop)
            .reduce(f64::max)
            .ok_or(SourceError::EmptyRange)
    }

    /// Smallest non-zero step, considering both the sub-range steps and the
    /// gaps between consecutive sub-ranges. Zero when everything is continuous.
    pub fn step(&self) -> Result<f64> {
        self.check_monotonic()?;

        let mut last = self.ranges[0];
        let mut min_step: Option<f64> = None;
        for range in &self.ranges {
            let between = range.start - last.stop;
            for candidate in [range.step, between] {
                if candidate > 0.0 {
                    min_step = Some(min_step.map_or(candidate, |m| m.min(candidate)));
                }
            }
            last = *range;
        }

        Ok(min_step.unwrap_or(0.0))
    }

    /// Clip `value` into the range.
    ///
    /// Values falling in a gap snap to the nearer edge. With `clip_step` set,
    /// values inside a stepped sub-range are rounded to the nearest step.
    pub fn clip(&self, value: f64, clip_step: bool) -> Result<f64> {
        self.check_monotonic()?;

        let mut last_stop = self.ranges[0].stop;
        for range in &self.ranges {
            if value < range.start {
                return Ok(if (value - range.start).abs() < (value - last_stop).abs() {
                    range.start
                } else {
                    last_stop
                });
            }

            if value <= range.stop {
                if !clip_step || range.step == 0.0 {
                    return Ok(value);
                }
                return Ok(((value - range.start) / range.step).round() * range.step + range.start);
            }

            last_stop = range.stop;
        }

        Ok(last_stop)
    }

    /// Every discrete value described by the range.
    ///
    /// Continuous sub-ranges contribute their endpoints only.
    #[must_use]
    pub fn values(&self) -> Vec<f64> {
        let mut values = Vec::new();

        for range in &self.ranges {
            if range.step > 0.0 {
                #[allow(
                    clippy::cast_possible_truncation,
                    clippy::cast_sign_loss,
                    reason = "step count is non-negative and small"
                )]
                let count = ((range.stop - range.start) / range.step + 1e-9).floor() as usize;
                #[allow(clippy::cast_precision_loss, reason = "step index fits in f64")]
                let stepped = (0..=count).map(|i| range.start + i as f64 * range.step);
                values.extend(stepped);
            } else {
                values.push(range.start);
                if !range.is_single_value() {
                    values.push(range.stop);
                }
            }
        }

        values
    }

    /// Multi-line description, one sub-range per line.
    #[must_use]
    pub fn to_pp_string(&self) -> String {
        self.ranges
            .iter()
            .map(|r| format!("{r}\n"))
            .collect()
    }

    fn check_monotonic(&self) -> Result<()> {
        if self.ranges.is_empty() {
            return Err(SourceError::EmptyRange);
        }
        for pair in self.ranges.windows(2) {
            if pair[1].start < pair[0].stop {
                return Err(SourceError::NonMonotonicRange);
            }
        }
        Ok(())
    }
}

impl From<Range> for MetaRange {
    fn from(range: Range) -> Self {
        Self { ranges: vec![range] }
    }
}

impl FromIterator<Range> for MetaRange {
    fn from_iter<I: IntoIterator<Item = Range>>(iter: I) -> Self {
        Self {
            ranges: iter.into_iter().collect(),
        }
    }
}

impl Extend<Range> for MetaRange {
    fn extend<I: IntoIterator<Item = Range>>(&mut self, iter: I) {
        self.ranges.extend(iter);
    }
}

impl<'a> IntoIterator for &'a MetaRange {
    type Item = &'a Range;
    type IntoIter = std::slice::Iter<'a, Range>;

    fn into_iter(self) -> Self::IntoIter {
        self.ranges.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rtl_rates() -> MetaRange {
        [250e3, 1e6, 1.024e6, 2.4e6]
            .into_iter()
            .map(Range::from_value)
            .collect()
    }

    #[test]
    fn test_start_stop() {
        let range = rtl_rates();
        assert_eq!(range.start().unwrap(), 250e3);
        assert_eq!(range.stop().unwrap(), 2.4e6);
    }

    #[test]
    fn test_empty_range_errors() {
        let range = MetaRange::new();
        assert!(matches!(range.start(), Err(SourceError::EmptyRange)));
        assert!(matches!(range.stop(), Err(SourceError::EmptyRange)));
        assert!(matches!(range.step(), Err(SourceError::EmptyRange)));
        assert!(matches!(range.clip(1.0, false), Err(SourceError::EmptyRange)));
    }

    #[test]
    fn test_step_uses_gaps_between_values() {
        // gaps are 750k, 24k and 1.376M
        assert!((rtl_rates().step().unwrap() - 24e3).abs() < 1e-6);
    }

    #[test]
    fn test_step_continuous_is_zero() {
        let range = MetaRange::single(24e6, 1766e6, 0.0);
        assert_eq!(range.step().unwrap(), 0.0);
    }

    #[test]
    fn test_clip_snaps_to_nearest_discrete_value() {
        let range = rtl_rates();
        assert_eq!(range.clip(1.01e6, false).unwrap(), 1e6);
        assert_eq!(range.clip(1.02e6, false).unwrap(), 1.024e6);
        assert_eq!(range.clip(100.0, false).unwrap(), 250e3);
        assert_eq!(range.clip(10e6, false).unwrap(), 2.4e6);
    }

    #[test]
    fn test_clip_to_step() {
        let range = MetaRange::single(3.0, 56.0, 1.0);
        assert_eq!(range.clip(20.4, true).unwrap(), 20.0);
        assert_eq!(range.clip(20.6, true).unwrap(), 21.0);
        assert_eq!(range.clip(20.4, false).unwrap(), 20.4);
        assert_eq!(range.clip(-5.0, true).unwrap(), 3.0);
    }

    #[test]
    fn test_clip_in_gap_between_ranges() {
        let mut range = MetaRange::single(146e6, 308e6, 0.0);
        range.push(Range::continuous(438e6, 924e6));
        assert_eq!(range.clip(320e6, false).unwrap(), 308e6);
        assert_eq!(range.clip(430e6, false).unwrap(), 438e6);
    }

    #[test]
    fn test_non_monotonic_rejected() {
        let range: MetaRange = [Range::from_value(2.0), Range::from_value(1.0)]
            .into_iter()
            .collect();
        assert!(matches!(range.clip(1.5, false), Err(SourceError::NonMonotonicRange)));
    }

    #[test]
    fn test_values() {
        let mut range = MetaRange::single(-3.0, 6.0, 9.0);
        range.push(Range::continuous(10.0, 12.0));
        assert_eq!(range.values(), vec![-3.0, 6.0, 10.0, 12.0]);

        let stepped = MetaRange::single(3.0, 15.0, 3.0);
        assert_eq!(stepped.values(), vec![3.0, 6.0, 9.0, 12.0, 15.0]);
    }

    #[test]
    fn test_pp_string() {
        let mut range = MetaRange::single(0.0, 10.0, 0.5);
        range.push(Range::from_value(20.0));
        assert_eq!(range.to_pp_string(), "(0, 10, 0.5)\n20\n");
    }
}
