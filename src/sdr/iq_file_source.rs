//! IQ file source block for FutureSDR.
//!
//! Reads recorded IQ samples and outputs Complex<f32>. Two layouts are
//! understood:
//! - raw interleaved little-endian float32 (`.cf32`, `.cfile`, `.iq`, ...)
//! - 16-bit stereo WAV, left channel = I, right channel = Q

use futuresdr::anyhow::Result;
use futuresdr::async_trait::async_trait;
use futuresdr::num_complex::Complex;
use futuresdr::runtime::Block;
use futuresdr::runtime::BlockMeta;
use futuresdr::runtime::BlockMetaBuilder;
use futuresdr::runtime::Kernel;
use futuresdr::runtime::MessageIo;
use futuresdr::runtime::MessageIoBuilder;
use futuresdr::runtime::StreamIo;
use futuresdr::runtime::StreamIoBuilder;
use futuresdr::runtime::WorkIo;
use hound::WavReader;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::SourceError;

/// Samples decoded per refill.
const CHUNK_SAMPLES: usize = 8192;

/// Bytes per complex float32 sample.
const CF32_SAMPLE_BYTES: usize = 8;

/// On-disk sample layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Interleaved little-endian float32 I/Q.
    Cf32,
    /// 16-bit stereo WAV (I left, Q right).
    Wav,
}

impl SampleFormat {
    /// Pick the format from the file extension. Anything that is not `.wav`
    /// is treated as raw float32.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        let is_wav = path
            .extension()
            .and_then(|s| s.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"));

        if is_wav {
            Self::Wav
        } else {
            Self::Cf32
        }
    }
}

enum Reader {
    Cf32(BufReader<File>),
    Wav(WavReader<BufReader<File>>),
}

/// Open `path` in the given format, validating WAV headers.
fn open_reader(path: &Path, format: SampleFormat) -> Result<Reader, SourceError> {
    match format {
        SampleFormat::Cf32 => Ok(Reader::Cf32(BufReader::new(File::open(path)?))),
        SampleFormat::Wav => {
            let reader = WavReader::open(path)?;
            let spec = reader.spec();

            if spec.channels != 2 {
                return Err(SourceError::InvalidArgs {
                    key: "file".to_string(),
                    reason: format!("WAV file must be stereo (2 channels), found {} channels", spec.channels),
                });
            }

            if spec.bits_per_sample != 16 {
                return Err(SourceError::InvalidArgs {
                    key: "file".to_string(),
                    reason: format!("WAV file must be 16-bit, found {} bits per sample", spec.bits_per_sample),
                });
            }

            log::debug!(
                "WAV file: {} Hz, {:.2} seconds",
                spec.sample_rate,
                f64::from(reader.duration()) / f64::from(spec.sample_rate)
            );

            Ok(Reader::Wav(reader))
        }
    }
}

/// Check that `path` can be opened as `format`. Returns the sample rate
/// from the header for WAV files.
pub(crate) fn probe(path: &Path, format: SampleFormat) -> Result<Option<u32>, SourceError> {
    match open_reader(path, format)? {
        Reader::Cf32(_) => Ok(None),
        Reader::Wav(reader) => Ok(Some(reader.spec().sample_rate)),
    }
}

/// Decode interleaved little-endian float32 pairs. Trailing bytes that do not
/// form a whole sample are ignored.
pub(crate) fn decode_cf32(bytes: &[u8], out: &mut Vec<Complex<f32>>) {
    out.extend(bytes.chunks_exact(CF32_SAMPLE_BYTES).map(|chunk| {
        let i = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let q = f32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
        Complex::new(i, q)
    }));
}

/// IQ file source block.
pub struct IqFileSource {
    reader: Reader,
    repeat: bool,
    buffer: Vec<Complex<f32>>,
    bytes: Vec<u8>,
    buffer_index: usize,
    /// Whether the current pass over the file produced anything
    produced_this_pass: bool,
    finished: bool,
}

impl std::fmt::Debug for IqFileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let format = match self.reader {
            Reader::Cf32(_) => SampleFormat::Cf32,
            Reader::Wav(_) => SampleFormat::Wav,
        };
        f.debug_struct("IqFileSource")
            .field("format", &format)
            .field("repeat", &self.repeat)
            .field("buffered", &(self.buffer.len() - self.buffer_index))
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl IqFileSource {
    /// Create a new IQ file source block.
    ///
    /// # Arguments
    /// * `path` - Path to the IQ file
    /// * `format` - Sample layout of the file
    /// * `repeat` - Rewind and continue when the end of the file is reached
    ///
    /// # Errors
    /// Returns error if the file cannot be opened or is not a valid stereo WAV
    pub fn new(path: impl AsRef<Path>, format: SampleFormat, repeat: bool) -> Result<Block, SourceError> {
        let reader = open_reader(path.as_ref(), format)?;

        log::info!(
            "Opened IQ file {} ({:?}, repeat={})",
            path.as_ref().display(),
            format,
            repeat
        );

        Ok(Block::new(
            BlockMetaBuilder::new("IqFileSource").build(),
            StreamIoBuilder::new()
                .add_output::<Complex<f32>>("out")
                .build(),
            MessageIoBuilder::new().build(),
            Self {
                reader,
                repeat,
                buffer: Vec::with_capacity(CHUNK_SAMPLES),
                bytes: vec![0; CHUNK_SAMPLES * CF32_SAMPLE_BYTES],
                buffer_index: 0,
                produced_this_pass: false,
                finished: false,
            },
        ))
    }

    /// Read samples from the file into the buffer, rewinding on EOF when
    /// repeating. Leaves the buffer empty once playback is over.
    fn fill_buffer(&mut self) -> Result<()> {
        self.buffer.clear();
        self.buffer_index = 0;

        loop {
            let at_eof = match &mut self.reader {
                Reader::Cf32(reader) => {
                    let mut filled = 0;
                    while filled < self.bytes.len() {
                        let n = reader.read(&mut self.bytes[filled..])?;
                        if n == 0 {
                            break;
                        }
                        filled += n;
                    }
                    decode_cf32(&self.bytes[..filled], &mut self.buffer);
                    filled < self.bytes.len()
                }
                Reader::Wav(reader) => {
                    let mut samples = reader.samples::<i16>();
                    let mut eof = false;
                    while self.buffer.len() < CHUNK_SAMPLES {
                        let (Some(i_sample), Some(q_sample)) = (samples.next(), samples.next()) else {
                            eof = true;
                            break;
                        };
                        // Normalize int16 to float32: -32768..32767 -> -1.0..1.0
                        let i_float = f32::from(i_sample?) / 32768.0;
                        let q_float = f32::from(q_sample?) / 32768.0;
                        self.buffer.push(Complex::new(i_float, q_float));
                    }
                    eof
                }
            };

            if !self.buffer.is_empty() {
                self.produced_this_pass = true;
            }

            if !at_eof || !self.buffer.is_empty() {
                if at_eof {
                    self.end_of_pass()?;
                }
                return Ok(());
            }

            // Nothing read and at EOF
            if !self.end_of_pass()? {
                return Ok(());
            }
        }
    }

    /// Handle end of file. Returns true if the file was rewound.
    fn end_of_pass(&mut self) -> Result<bool> {
        if !self.repeat || !self.produced_this_pass {
            self.finished = true;
            return Ok(false);
        }

        match &mut self.reader {
            Reader::Cf32(reader) => {
                reader.seek(SeekFrom::Start(0))?;
            }
            Reader::Wav(reader) => reader.seek(0)?,
        }
        self.produced_this_pass = false;
        log::debug!("IQ file rewound");
        Ok(true)
    }
}

#[async_trait]
impl Kernel for IqFileSource {
    async fn work(
        &mut self,
        io: &mut WorkIo,
        sio: &mut StreamIo,
        _mio: &mut MessageIo<Self>,
        _meta: &mut BlockMeta,
    ) -> Result<()> {
        let output = sio.output(0).slice::<Complex<f32>>();

        // If buffer is drained, refill it
        if self.buffer_index >= self.buffer.len() {
            if self.finished {
                io.finished = true;
                return Ok(());
            }

            self.fill_buffer()?;

            if self.buffer.is_empty() {
                io.finished = true;
                return Ok(());
            }
        }

        let n_available = self.buffer.len() - self.buffer_index;
        let n_to_copy = n_available.min(output.len());

        output[..n_to_copy].copy_from_slice(
            &self.buffer[self.buffer_index..self.buffer_index + n_to_copy]
        );

        self.buffer_index += n_to_copy;
        sio.output(0).produce(n_to_copy);

        if n_to_copy > 0 {
            io.call_again = true;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdr::SampleLimit;
    use futuresdr::blocks::VectorSink;
    use futuresdr::blocks::VectorSinkBuilder;
    use futuresdr::runtime::Flowgraph;
    use futuresdr::runtime::Runtime;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(SampleFormat::from_path(Path::new("a.wav")), SampleFormat::Wav);
        assert_eq!(SampleFormat::from_path(Path::new("a.WAV")), SampleFormat::Wav);
        assert_eq!(SampleFormat::from_path(Path::new("a.cf32")), SampleFormat::Cf32);
        assert_eq!(SampleFormat::from_path(Path::new("capture")), SampleFormat::Cf32);
    }

    #[test]
    fn test_decode_cf32_ignores_partial_sample() {
        let mut bytes = Vec::new();
        for v in [0.5f32, -0.25, 1.0, 0.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes.extend_from_slice(&[1, 2, 3]);

        let mut out = Vec::new();
        decode_cf32(&bytes, &mut out);
        assert_eq!(out, vec![Complex::new(0.5, -0.25), Complex::new(1.0, 0.0)]);
    }

    fn run_block(block: Block, limit: u64) -> Vec<Complex<f32>> {
        let mut fg = Flowgraph::new();
        let src = fg.add_block(block);
        let head = fg.add_block(SampleLimit::<Complex<f32>>::new(limit));
        let snk = fg.add_block(VectorSinkBuilder::<Complex<f32>>::new().build());
        fg.connect_stream(src, "out", head, "in").unwrap();
        fg.connect_stream(head, "out", snk, "in").unwrap();

        let fg = Runtime::new().run(fg).unwrap();
        fg.kernel::<VectorSink<Complex<f32>>>(snk).unwrap().items().clone()
    }

    fn write_cf32(name: &str, values: &[f32]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(name);
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn write_stereo_wav(name: &str, sample_rate: u32, samples: &[i16]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(name);
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for &sample in samples {
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
        path
    }

    #[test]
    fn test_cf32_repeat_wraps_around() {
        let path = write_cf32("osmosdr_source_wrap.cf32", &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let block = IqFileSource::new(&path, SampleFormat::Cf32, true).unwrap();

        let items = run_block(block, 7);
        let expected: Vec<_> = [(1.0, 2.0), (3.0, 4.0), (5.0, 6.0)]
            .into_iter()
            .cycle()
            .take(7)
            .map(|(i, q)| Complex::new(i, q))
            .collect();
        assert_eq!(items, expected);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_cf32_without_repeat_ends_at_eof() {
        let path = write_cf32("osmosdr_source_once.cf32", &[0.5, -0.5, 0.25, 0.75]);
        let block = IqFileSource::new(&path, SampleFormat::Cf32, false).unwrap();

        let items = run_block(block, 1000);
        assert_eq!(items, vec![Complex::new(0.5, -0.5), Complex::new(0.25, 0.75)]);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_wav_decoding_with_repeat() {
        let path = write_stereo_wav("osmosdr_source_iq.wav", 48_000, &[16384, -16384, 0, 32767]);
        let block = IqFileSource::new(&path, SampleFormat::Wav, true).unwrap();

        let items = run_block(block, 6);
        assert_eq!(items.len(), 6);
        for pair in items.chunks(2) {
            assert_eq!(pair[0], Complex::new(0.5, -0.5));
            assert_eq!(pair[1], Complex::new(0.0, 32767.0 / 32768.0));
        }

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_empty_file_with_repeat_finishes() {
        let path = write_cf32("osmosdr_source_empty.cf32", &[]);
        let block = IqFileSource::new(&path, SampleFormat::Cf32, true).unwrap();

        assert!(run_block(block, 10).is_empty());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_probe_reports_wav_rate() {
        let path = write_stereo_wav("osmosdr_source_probe_rate.wav", 96_000, &[0, 0]);
        assert_eq!(probe(&path, SampleFormat::Wav).unwrap(), Some(96_000));

        let raw = write_cf32("osmosdr_source_probe_rate.cf32", &[0.0, 0.0]);
        assert_eq!(probe(&raw, SampleFormat::Cf32).unwrap(), None);

        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_file(&raw);
    }

    #[test]
    fn test_probe_rejects_mono_wav() {
        let path = std::env::temp_dir().join("osmosdr_source_mono.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 48_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        writer.write_sample(0i16).unwrap();
        writer.finalize().unwrap();

        let err = probe(&path, SampleFormat::Wav).unwrap_err();
        assert!(matches!(err, SourceError::InvalidArgs { .. }));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_probe_missing_file() {
        let err = probe(Path::new("/nonexistent/osmosdr.cf32"), SampleFormat::Cf32).unwrap_err();
        assert!(matches!(err, SourceError::Io(_)));
    }
}
