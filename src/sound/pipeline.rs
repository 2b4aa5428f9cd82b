//! Decoder to sink playback pipeline
//!
//! One pipeline pumps one decoder handle into one sink: read, remap
//! channels, resample, convert, write. `spawn_playback` runs a pipeline on
//! its own worker thread and reports the outcome through a channel.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver};

use super::convert::{convert, mono_to_stereo, to_f32};
use super::decoder::{DecodeError, DecodedChunk, DecoderHandle};
use super::error::ErrorKind;
use super::formats::{PcmBuffer, StreamInfo};
use super::output::{negotiate, AudioSink, OutputError};
use super::registry::{Registry, RegistryError};
use super::resample::{InterpolatingResampler, ResampleQuality, Resampler};

/// Consecutive zero-frame writes tolerated before the sink counts as stuck
const MAX_STALLED_WRITES: u32 = 1000;

/// Error type for playback
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaybackError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error("Playback worker failed: {0}")]
    Worker(String),
}

impl PlaybackError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlaybackError::Registry(e) => e.kind(),
            PlaybackError::Decode(e) => e.kind(),
            PlaybackError::Output(e) => e.kind(),
            PlaybackError::Worker(_) => ErrorKind::Internal,
        }
    }
}

/// Tunables for one pipeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineOptions {
    /// Frames requested from the decoder per read
    pub buffer_frames: usize,
    /// Retries for a read that failed with `IoFailure`
    pub read_retries: u32,
    /// Output rate to ask the sink for instead of the source rate
    pub preferred_rate: Option<u32>,
    pub quality: ResampleQuality,
    /// Output gain, 0.0 to 1.0
    pub volume: f32,
    pub muted: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            buffer_frames: 4096,
            read_retries: 3,
            preferred_rate: None,
            quality: ResampleQuality::default(),
            volume: 1.0,
            muted: false,
        }
    }
}

/// Cooperative cancellation flag, checked between buffers
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of a completed or cancelled playback
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackReport {
    pub decoder: String,
    pub source: StreamInfo,
    pub output: StreamInfo,
    pub frames_decoded: u64,
    pub frames_written: u64,
    pub cancelled: bool,
}

/// Pumps a decoder into a sink
pub struct Pipeline<S: AudioSink> {
    sink: S,
    options: PipelineOptions,
    resampler: Box<dyn Resampler>,
}

impl<S: AudioSink> Pipeline<S> {
    pub fn new(sink: S, options: PipelineOptions) -> Self {
        Self {
            sink,
            options,
            resampler: Box::new(InterpolatingResampler::new(options.quality)),
        }
    }

    /// Replace the default interpolating resampler
    pub fn with_resampler(mut self, resampler: Box<dyn Resampler>) -> Self {
        self.resampler = resampler;
        self
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Stream configuration the sink will be opened with for `source`
    pub fn negotiate(&self, source: &StreamInfo) -> Result<StreamInfo, OutputError> {
        let caps = self.sink.capabilities()?;
        let mut requested = *source;
        if let Some(rate) = self.options.preferred_rate {
            requested.sample_rate = rate;
        }

        let mut actual = negotiate(&requested, &caps)?;
        // Frame count follows the source rate, not the requested one
        actual.total_frames = source.total_frames.map(|frames| {
            let num = frames as u128 * actual.sample_rate as u128;
            let den = source.sample_rate.max(1) as u128;
            ((num + den - 1) / den) as u64
        });
        Ok(actual)
    }

    /// Play `handle` to the end, an error, or cancellation
    ///
    /// The handle and the sink are closed on every path.
    pub fn play(
        &mut self,
        handle: &mut DecoderHandle,
        cancel: &CancelToken,
    ) -> Result<PlaybackReport, PlaybackError> {
        let source = *handle.stream_info();
        let result = self.negotiate(&source).map_err(PlaybackError::from).and_then(|output| {
            self.sink.set_volume(self.options.volume);
            self.sink.set_mute(self.options.muted);
            self.sink.open(&output)?;
            log::info!(
                "Playing {} ({}) to '{}' as {}",
                handle.decoder_name(),
                source,
                self.sink.name(),
                output
            );

            let mut report = PlaybackReport {
                decoder: handle.decoder_name().to_string(),
                source,
                output,
                frames_decoded: 0,
                frames_written: 0,
                cancelled: false,
            };
            self.run(handle, cancel, &mut report)?;
            Ok(report)
        });

        self.sink.close();
        handle.close();
        self.resampler.reset();

        match &result {
            Ok(report) if report.cancelled => log::info!("Playback cancelled"),
            Ok(report) => log::info!("Playback finished: {} frames written", report.frames_written),
            Err(e) => log::error!("Playback aborted: {}", e),
        }
        result
    }

    fn run(
        &mut self,
        handle: &mut DecoderHandle,
        cancel: &CancelToken,
        report: &mut PlaybackReport,
    ) -> Result<(), PlaybackError> {
        let pumped = self.pump(handle, cancel, report);
        // Frames already queued still play out when the stream fails
        let drained = self.sink.drain();
        match (pumped, drained) {
            (Err(e), Err(drain_err)) => {
                log::warn!("Drain after failed playback also failed: {}", drain_err);
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(()), drained) => drained.map_err(PlaybackError::from),
        }
    }

    fn pump(
        &mut self,
        handle: &mut DecoderHandle,
        cancel: &CancelToken,
        report: &mut PlaybackReport,
    ) -> Result<(), PlaybackError> {
        let source = report.source;
        let output = report.output;

        loop {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let chunk = self.read_with_retry(handle)?;
            report.frames_decoded += chunk.frames as u64;
            if chunk.frames > 0 {
                let samples = self.process(chunk.samples, &source, &output);
                report.frames_written += self.write_all(&samples, &output)?;
            }
            if chunk.end_of_stream {
                break;
            }
        }

        if !report.cancelled && source.sample_rate != output.sample_rate {
            let tail = self
                .resampler
                .flush(output.channels, source.sample_rate, output.sample_rate);
            if !tail.is_empty() {
                let tail = convert(PcmBuffer::F32(tail).as_slice(), output.sample_format);
                report.frames_written += self.write_all(&tail, &output)?;
            }
        }
        Ok(())
    }

    fn read_with_retry(&mut self, handle: &mut DecoderHandle) -> Result<DecodedChunk, DecodeError> {
        let mut attempts = 0;
        loop {
            match handle.read(self.options.buffer_frames) {
                Ok(chunk) => return Ok(chunk),
                Err(e) if e.kind().is_transient() && attempts < self.options.read_retries => {
                    attempts += 1;
                    log::warn!(
                        "Read failed ({}), retry {}/{}",
                        e,
                        attempts,
                        self.options.read_retries
                    );
                    thread::sleep(Duration::from_millis(10 * attempts as u64));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Remap, resample and convert one decoded buffer for the sink
    fn process(&mut self, samples: PcmBuffer, source: &StreamInfo, output: &StreamInfo) -> PcmBuffer {
        let mut samples = if source.channels == 1 && output.channels == 2 {
            mono_to_stereo(samples.as_slice())
        } else {
            samples
        };

        if source.sample_rate != output.sample_rate {
            let input = to_f32(samples.as_slice());
            samples = PcmBuffer::F32(self.resampler.resample(
                &input,
                output.channels,
                source.sample_rate,
                output.sample_rate,
            ));
        }

        if samples.format() != output.sample_format {
            samples = convert(samples.as_slice(), output.sample_format);
        }
        samples
    }

    /// Write a whole buffer, resubmitting the remainder after partial writes
    fn write_all(&mut self, samples: &PcmBuffer, output: &StreamInfo) -> Result<u64, OutputError> {
        let channels = output.channels as usize;
        let slice = samples.as_slice();
        let total = slice.len() - slice.len() % channels;
        let mut offset = 0;
        let mut written = 0u64;
        let mut stalled = 0;

        while offset < total {
            let frames = self.sink.write(slice.range(offset, total))?;
            if frames == 0 {
                stalled += 1;
                if stalled > MAX_STALLED_WRITES {
                    return Err(OutputError::IoFailure(
                        "sink stopped accepting frames".to_string(),
                    ));
                }
                thread::yield_now();
                continue;
            }
            stalled = 0;
            offset += frames * channels;
            written += frames as u64;
        }
        log::debug!("Wrote {} frames", written);
        Ok(written)
    }
}

/// A pipeline running on its own worker thread
///
/// Dropping the handle without `wait` cancels the playback.
pub struct PlaybackHandle {
    cancel: CancelToken,
    result: Receiver<Result<PlaybackReport, PlaybackError>>,
    worker: Option<JoinHandle<()>>,
}

impl PlaybackHandle {
    /// Ask the worker to stop after the current buffer
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Result if the worker has finished, without blocking
    pub fn try_result(&self) -> Option<Result<PlaybackReport, PlaybackError>> {
        self.result.try_recv().ok()
    }

    /// Block until the worker finishes
    pub fn wait(mut self) -> Result<PlaybackReport, PlaybackError> {
        let result = self
            .result
            .recv()
            .unwrap_or_else(|_| Err(PlaybackError::Worker("worker exited without a result".to_string())));
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                return Err(PlaybackError::Worker("worker panicked".to_string()));
            }
        }
        result
    }
}

impl Drop for PlaybackHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Resolve, open and play `path` on a new worker thread
///
/// The sink is created by `sink_factory` on the worker itself, so sinks
/// that cannot cross threads can still be used.
pub fn spawn_playback<S, F>(
    registry: Arc<Registry>,
    path: PathBuf,
    sink_factory: F,
    options: PipelineOptions,
) -> Result<PlaybackHandle, PlaybackError>
where
    S: AudioSink + 'static,
    F: FnOnce() -> Result<S, OutputError> + Send + 'static,
{
    let cancel = CancelToken::new();
    let token = cancel.clone();
    let (tx, rx) = channel::bounded(1);

    let worker = thread::Builder::new()
        .name("pcmplay-pipeline".to_string())
        .spawn(move || {
            let run = || -> Result<PlaybackReport, PlaybackError> {
                let mut handle = registry.open(&path)?;
                let sink = sink_factory()?;
                let mut pipeline = Pipeline::new(sink, options);
                pipeline.play(&mut handle, &token)
            };
            let _ = tx.send(run());
        })
        .map_err(|e| PlaybackError::Worker(format!("Failed to spawn worker: {}", e)))?;

    Ok(PlaybackHandle {
        cancel,
        result: rx,
        worker: Some(worker),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sound::decoder::{DecodeResult, SoundDecoder};
    use crate::sound::formats::{PcmSlice, SampleFormat};
    use crate::sound::output::{NullSink, SupportedConfig};
    use parking_lot::Mutex;

    /// Mono or stereo Int16 ramp with optional injected failures
    struct ToneDecoder {
        info: StreamInfo,
        pos: u64,
        failures: Vec<DecodeError>,
        /// Reads from this frame on fail with corrupt data
        corrupt_from: Option<u64>,
    }

    impl ToneDecoder {
        fn new(rate: u32, channels: u16, frames: u64) -> Self {
            Self {
                info: StreamInfo::new(rate, channels, SampleFormat::Int16).with_total_frames(Some(frames)),
                pos: 0,
                failures: Vec::new(),
                corrupt_from: None,
            }
        }
    }

    impl SoundDecoder for ToneDecoder {
        fn name(&self) -> &'static str {
            "Tone"
        }
        fn stream_info(&self) -> StreamInfo {
            self.info
        }
        fn read(&mut self, max_frames: usize) -> DecodeResult<DecodedChunk> {
            if let Some(err) = self.failures.pop() {
                return Err(err);
            }
            if matches!(self.corrupt_from, Some(frame) if self.pos >= frame) {
                return Err(DecodeError::CorruptData(format!("bad block at {}", self.pos)));
            }
            let total = self.info.total_frames.unwrap_or(0);
            let n = (total - self.pos).min(max_frames as u64);
            let samples: Vec<i16> = (0..n * self.info.channels as u64)
                .map(|i| (i % 100) as i16 * 100)
                .collect();
            self.pos += n;
            Ok(DecodedChunk::new(PcmBuffer::I16(samples), self.info.channels, self.pos == total))
        }
        fn seek(&mut self, frame: u64) -> DecodeResult<u64> {
            self.pos = frame;
            Ok(frame)
        }
        fn position(&self) -> u64 {
            self.pos
        }
        fn close(&mut self) {}
    }

    #[derive(Debug, Default)]
    struct Recorded {
        opened: Option<StreamInfo>,
        writes: Vec<(SampleFormat, usize)>,
        drained: bool,
        closed: bool,
        volume: Option<f32>,
        muted: bool,
    }

    /// Sink with fixed capabilities that records what it receives
    struct RecordingSink {
        caps: Vec<SupportedConfig>,
        max_frames: usize,
        log: Arc<Mutex<Recorded>>,
    }

    impl RecordingSink {
        fn new(caps: Vec<SupportedConfig>, max_frames: usize) -> (Self, Arc<Mutex<Recorded>>) {
            let log = Arc::new(Mutex::new(Recorded::default()));
            (
                Self {
                    caps,
                    max_frames,
                    log: Arc::clone(&log),
                },
                log,
            )
        }
    }

    impl AudioSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }
        fn capabilities(&self) -> Result<Vec<SupportedConfig>, OutputError> {
            Ok(self.caps.clone())
        }
        fn open(&mut self, config: &StreamInfo) -> Result<(), OutputError> {
            self.log.lock().opened = Some(*config);
            Ok(())
        }
        fn write(&mut self, samples: PcmSlice<'_>) -> Result<usize, OutputError> {
            let mut log = self.log.lock();
            let channels = log.opened.map(|c| c.channels).ok_or(OutputError::NotOpen)?;
            let frames = samples.frames(channels).min(self.max_frames);
            log.writes.push((samples.format(), frames));
            Ok(frames)
        }
        fn drain(&mut self) -> Result<(), OutputError> {
            self.log.lock().drained = true;
            Ok(())
        }
        fn close(&mut self) {
            self.log.lock().closed = true;
        }
        fn set_volume(&mut self, volume: f32) {
            self.log.lock().volume = Some(volume.clamp(0.0, 1.0));
        }
        fn volume(&self) -> f32 {
            self.log.lock().volume.unwrap_or(1.0)
        }
        fn set_mute(&mut self, mute: bool) {
            self.log.lock().muted = mute;
        }
        fn is_muted(&self) -> bool {
            self.log.lock().muted
        }
    }

    fn options(buffer_frames: usize) -> PipelineOptions {
        PipelineOptions {
            buffer_frames,
            ..Default::default()
        }
    }

    #[test]
    fn test_plays_to_end_and_closes() {
        let (sink, log) = RecordingSink::new(vec![SupportedConfig::fixed(2, 8000, SampleFormat::Int16)], 4096);
        let mut handle = DecoderHandle::new(Box::new(ToneDecoder::new(8000, 2, 1000)));
        let mut pipeline = Pipeline::new(sink, options(256));

        let report = pipeline.play(&mut handle, &CancelToken::new()).unwrap();
        assert_eq!(report.frames_decoded, 1000);
        assert_eq!(report.frames_written, 1000);
        assert!(!report.cancelled);
        assert!(handle.is_closed());

        let log = log.lock();
        assert!(log.drained);
        assert!(log.closed);
        assert!(log.writes.iter().all(|(f, _)| *f == SampleFormat::Int16));
    }

    #[test]
    fn test_partial_writes_are_resubmitted() {
        let (sink, log) = RecordingSink::new(vec![SupportedConfig::fixed(1, 8000, SampleFormat::Int16)], 7);
        let mut handle = DecoderHandle::new(Box::new(ToneDecoder::new(8000, 1, 100)));
        let mut pipeline = Pipeline::new(sink, options(64));

        let report = pipeline.play(&mut handle, &CancelToken::new()).unwrap();
        assert_eq!(report.frames_written, 100);
        let log = log.lock();
        assert!(log.writes.iter().all(|(_, n)| *n <= 7));
        assert_eq!(log.writes.iter().map(|(_, n)| n).sum::<usize>(), 100);
    }

    #[test]
    fn test_mono_widened_for_stereo_sink() {
        let (sink, log) = RecordingSink::new(vec![SupportedConfig::fixed(2, 8000, SampleFormat::Int16)], 4096);
        let mut handle = DecoderHandle::new(Box::new(ToneDecoder::new(8000, 1, 50)));
        let mut pipeline = Pipeline::new(sink, options(64));

        let report = pipeline.play(&mut handle, &CancelToken::new()).unwrap();
        assert_eq!(report.output.channels, 2);
        assert_eq!(report.frames_written, 50);
        assert_eq!(log.lock().opened.map(|c| c.channels), Some(2));
    }

    #[test]
    fn test_transient_read_failure_is_retried() {
        let mut decoder = ToneDecoder::new(8000, 1, 10);
        decoder.failures = vec![DecodeError::IoFailure("flaky".into())];
        let mut handle = DecoderHandle::new(Box::new(decoder));
        let mut pipeline = Pipeline::new(NullSink::default(), options(64));

        let report = pipeline.play(&mut handle, &CancelToken::new()).unwrap();
        assert_eq!(report.frames_written, 10);
    }

    #[test]
    fn test_retry_budget_is_bounded() {
        let mut decoder = ToneDecoder::new(8000, 1, 10);
        decoder.failures = vec![DecodeError::IoFailure("dead".into()); 5];
        let mut handle = DecoderHandle::new(Box::new(decoder));
        let mut pipeline = Pipeline::new(
            NullSink::default(),
            PipelineOptions {
                read_retries: 2,
                ..Default::default()
            },
        );

        let err = pipeline.play(&mut handle, &CancelToken::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoFailure);
        assert!(handle.is_closed());
    }

    #[test]
    fn test_corrupt_data_is_fatal() {
        let mut decoder = ToneDecoder::new(8000, 1, 10);
        decoder.failures = vec![DecodeError::CorruptData("bad".into())];
        let mut handle = DecoderHandle::new(Box::new(decoder));
        let (sink, log) = RecordingSink::new(vec![SupportedConfig::fixed(1, 8000, SampleFormat::Int16)], 4096);
        let mut pipeline = Pipeline::new(sink, options(64));

        let err = pipeline.play(&mut handle, &CancelToken::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptData);
        let log = log.lock();
        assert!(log.writes.is_empty());
        assert!(log.drained);
        assert!(log.closed);
    }

    #[test]
    fn test_error_mid_stream_drains_what_was_written() {
        let mut decoder = ToneDecoder::new(8000, 1, 1000);
        decoder.corrupt_from = Some(64);
        let mut handle = DecoderHandle::new(Box::new(decoder));
        let (sink, log) = RecordingSink::new(vec![SupportedConfig::fixed(1, 8000, SampleFormat::Int16)], 4096);
        let mut pipeline = Pipeline::new(sink, options(64));

        let err = pipeline.play(&mut handle, &CancelToken::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptData);
        let log = log.lock();
        assert_eq!(log.writes.iter().map(|(_, n)| n).sum::<usize>(), 64);
        assert!(log.drained);
        assert!(log.closed);
        assert!(handle.is_closed());
    }

    #[test]
    fn test_volume_and_mute_reach_sink_before_open() {
        let (sink, log) = RecordingSink::new(vec![SupportedConfig::fixed(1, 8000, SampleFormat::Int16)], 4096);
        let mut handle = DecoderHandle::new(Box::new(ToneDecoder::new(8000, 1, 10)));
        let mut pipeline = Pipeline::new(
            sink,
            PipelineOptions {
                volume: 1.5,
                muted: true,
                ..Default::default()
            },
        );

        pipeline.play(&mut handle, &CancelToken::new()).unwrap();
        let log = log.lock();
        assert_eq!(log.volume, Some(1.0));
        assert!(log.muted);
    }

    #[test]
    fn test_dropping_playback_handle_cancels() {
        let registry = Arc::new(Registry::new());
        let handle = spawn_playback(
            registry,
            PathBuf::from("unused.wav"),
            || Ok(NullSink::default()),
            PipelineOptions::default(),
        )
        .unwrap();
        let token = handle.cancel_token();
        assert!(!token.is_cancelled());
        drop(handle);
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancel_before_start_still_drains_and_closes() {
        let (sink, log) = RecordingSink::new(vec![SupportedConfig::fixed(1, 8000, SampleFormat::Int16)], 4096);
        let mut handle = DecoderHandle::new(Box::new(ToneDecoder::new(8000, 1, 1000)));
        let mut pipeline = Pipeline::new(sink, options(64));
        let cancel = CancelToken::new();
        cancel.cancel();

        let report = pipeline.play(&mut handle, &cancel).unwrap();
        assert!(report.cancelled);
        assert_eq!(report.frames_written, 0);
        let log = log.lock();
        assert!(log.drained);
        assert!(log.closed);
        assert!(handle.is_closed());
    }

    #[test]
    fn test_preferred_rate_forces_resampling() {
        let mut handle = DecoderHandle::new(Box::new(ToneDecoder::new(8000, 1, 800)));
        let mut pipeline = Pipeline::new(
            NullSink::default(),
            PipelineOptions {
                preferred_rate: Some(16000),
                buffer_frames: 100,
                ..Default::default()
            },
        );

        let report = pipeline.play(&mut handle, &CancelToken::new()).unwrap();
        assert_eq!(report.output.sample_rate, 16000);
        assert_eq!(report.output.total_frames, Some(1600));
        assert_eq!(report.frames_written, 1600);
    }

    #[test]
    fn test_unsupported_channels_fail_negotiation() {
        let (sink, log) = RecordingSink::new(vec![SupportedConfig::fixed(2, 8000, SampleFormat::Int16)], 4096);
        let mut handle = DecoderHandle::new(Box::new(ToneDecoder::new(8000, 4, 10)));
        let mut pipeline = Pipeline::new(sink, options(64));

        let err = pipeline.play(&mut handle, &CancelToken::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
        assert!(log.lock().opened.is_none());
        assert!(handle.is_closed());
    }
}
