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


//! Pass-through block that stops after a fixed number of samples.
//!
//! Unlike `futuresdr::blocks::Head`, it also finishes when its input
//! finishes first, so a finite source such as a non-repeating file ends
//! the flowgraph instead of leaving it waiting.

use futuresdr::anyhow::Result;
use futuresdr::async_trait::async_trait;
use futuresdr::runtime::Block;
use futuresdr::runtime::BlockMeta;
use futuresdr::runtime::BlockMetaBuilder;
use futuresdr::runtime::Kernel;
use futuresdr::runtime::MessageIo;
use futuresdr::runtime::MessageIoBuilder;
use futuresdr::runtime::StreamIo;
use futuresdr::runtime::StreamIoBuilder;
use futuresdr::runtime::WorkIo;
use std::marker::PhantomData;

/// Copies at most `limit` samples from `in` to `out`.
pub struct SampleLimit<T: Send + 'static> {
    remaining: u64,
    _type: PhantomData<T>,
}

impl<T: Send + 'static> std::fmt::Debug for SampleLimit<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleLimit")
            .field("remaining", &self.remaining)
            .finish_non_exhaustive()
    }
}

impl<T: Copy + Send + 'static> SampleLimit<T> {
    /// Create a limiter block passing through `limit` samples.
    pub fn new(limit: u64) -> Block {
        Block::new(
            BlockMetaBuilder::new("SampleLimit").build(),
            StreamIoBuilder::new()
                .add_input::<T>("in")
                .add_output::<T>("out")
                .build(),
            MessageIoBuilder::new().build(),
            Self {
                remaining: limit,
                _type: PhantomData,
            },
        )
    }
}

#[async_trait]
impl<T: Copy + Send + 'static> Kernel for SampleLimit<T> {
    async fn work(
        &mut self,
        io: &mut WorkIo,
        sio: &mut StreamIo,
        _mio: &mut MessageIo<Self>,
        _meta: &mut BlockMeta,
    ) -> Result<()> {
        let input_done = sio.input(0).finished();
        let input = sio.input(0).slice::<T>();
        let output = sio.output(0).slice::<T>();

        let remaining = usize::try_from(self.remaining).unwrap_or(usize::MAX);
        let n = remaining.min(input.len()).min(output.len());

        if n > 0 {
            output[..n].copy_from_slice(&input[..n]);
            self.remaining -= n as u64;
            sio.input(0).consume(n);
            sio.output(0).produce(n);
        }

        if self.remaining == 0 || (input_done && n == input.len()) {
            io.finished = true;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OsmoSdrSource;
    use futuresdr::blocks::VectorSink;
    use futuresdr::blocks::VectorSinkBuilder;
    use futuresdr::num_complex::Complex;
    use futuresdr::runtime::Flowgraph;
    use futuresdr::runtime::Runtime;

    fn record(args: &str, limit: u64) -> Vec<Complex<f32>> {
        let mut src = OsmoSdrSource::new(args).unwrap();
        let mut fg = Flowgraph::new();
        let out = src.connect(&mut fg).unwrap();
        let limit = fg.add_block(SampleLimit::<Complex<f32>>::new(limit));
        let snk = fg.add_block(VectorSinkBuilder::<Complex<f32>>::new().build());
        fg.connect_stream(out, "out", limit, "in").unwrap();
        fg.connect_stream(limit, "out", snk, "in").unwrap();

        let fg = Runtime::new().run(fg).unwrap();
        fg.kernel::<VectorSink<Complex<f32>>>(snk).unwrap().items().clone()
    }

    fn write_capture(name: &str, values: &[f32]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(name);
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_finishes_with_short_finite_source() {
        let path = write_capture("osmosdr_source_limit_short.cf32", &[1.0, 2.0, 3.0, 4.0]);
        let items = record(&format!("file={} throttle=false repeat=false", path.display()), 100);

        assert_eq!(items, vec![Complex::new(1.0, 2.0), Complex::new(3.0, 4.0)]);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_stops_at_limit() {
        let path = write_capture("osmosdr_source_limit_cut.cf32", &[1.0, 2.0, 3.0, 4.0]);
        let items = record(&format!("file={} throttle=false repeat=true", path.display()), 5);

        assert_eq!(items.len(), 5);
        assert_eq!(items[4], Complex::new(1.0, 2.0));

        let _ = std::fs::remove_file(&path);
    }
}
