//! # pmocodec
//!
//! Codec engine boundary for the timeline core.
//!
//! The timeline store treats its codec as an opaque engine able to turn PCM
//! frames into a compressed blob and back, plus build filter graphs over PCM.
//! This crate defines that contract ([`CodecEngine`]) and ships the default
//! implementation: a pure-Rust FLAC engine ([`FlacEngine`]) built on `claxon`
//! for decoding and `flacenc` for encoding. FLAC round-trips integer PCM
//! losslessly with very little container overhead, which is exactly what an
//! at-rest segment format needs.
//!
//! All engine calls are asynchronous and are meant to be issued while
//! holding a `pmopool` worker slot; the CPU-heavy codec cores run under
//! `spawn_blocking` so they never stall the orchestrating task.
//!
//! ## Example: encode then decode
//!
//! ```no_run
//! use bytes::Bytes;
//! use pmocodec::{CodecEngine, EncodeRequest, FlacEngine};
//! use pmopcm::{SampleFormat, SampleKind, StreamSpec};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = FlacEngine::new();
//!     let spec = StreamSpec::new(SampleFormat::interleaved(SampleKind::I16), 44_100, 2);
//!     let pcm: Bytes = Bytes::from(vec![0u8; 44_100 * 4]);
//!
//!     let flac = engine.encode(EncodeRequest { spec, data: pcm }).await?;
//!     let decoded = engine.decode(flac).await?;
//!     assert_eq!(decoded.spec.sample_rate, 44_100);
//!     Ok(())
//! }
//! ```

mod engine;
mod error;
mod filter;
mod flac;

pub use engine::{CodecEngine, DecodedAudio, EncodeRequest, FilterHandle, FilterSpec};
pub use error::CodecError;
pub use filter::PcmFilter;
pub use flac::FlacEngine;
