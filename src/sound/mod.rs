//! Sound decoding and playback
//!
//! # Architecture
//!
//! - `SoundDecoder` trait defines the decoder interface and
//!   `DecoderHandle` wraps one open session with its state machine
//! - Individual decoder modules (WAV, MP3, Ogg Vorbis, FLAC stub) each
//!   publish a `DecoderEntryPoints` table
//! - `Registry` binds those tables and picks a decoder per file
//! - `convert` and `resample` normalize samples for a sink
//! - `output` holds the sink trait, format negotiation and the sinks
//! - `pipeline` pumps a handle into a sink on a worker thread

pub mod convert;
pub mod decoder;
pub mod error;
pub mod flac;
pub mod formats;
pub mod module;
pub mod mp3;
pub mod ogg;
pub mod output;
pub mod pipeline;
pub mod probe;
pub mod registry;
pub mod resample;
pub mod wav;

pub use decoder::{DecodeError, DecodeResult, DecodedChunk, DecoderHandle, HandleState, SoundDecoder};
pub use error::ErrorKind;
pub use formats::{PcmBuffer, PcmSlice, SampleFormat, StreamInfo};
pub use module::{BuiltinLoader, DecoderEntryPoints, ModuleError, ModuleLoader};
pub use mp3::Mp3Decoder;
pub use ogg::OggDecoder;
pub use output::{AudioSink, DeviceSink, NullSink, OutputError, SupportedConfig};
pub use pipeline::{spawn_playback, CancelToken, Pipeline, PipelineOptions, PlaybackError, PlaybackHandle, PlaybackReport};
pub use probe::ProbeMatch;
pub use registry::{PluginDescriptor, Registry, RegistryError};
pub use resample::{InterpolatingResampler, ResampleQuality, Resampler};
pub use wav::{WavDecoder, WavHeader};
