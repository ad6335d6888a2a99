//! # reelkit
//!
//! Frame-accurate video editing building blocks: readers that decode media,
//! stills and HTML into numbered frames, writers that encode them again,
//! keyframe curves, a layered timeline with effects, and a real-time player.
//!
//! Decoding and encoding of media containers is delegated to the `ffmpeg`
//! and `ffprobe` executables; set `REELKIT_FFMPEG_DIR` to use a build that
//! is not on `PATH`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use reelkit::{
//!     core::{ChannelLayout, Fraction},
//!     readers::{FfmpegReader, Reader},
//!     writers::{FfmpegWriter, Writer},
//! };
//!
//! # fn main() -> reelkit::Result<()> {
//! let mut reader = FfmpegReader::new("sintel_trailer-720p.mp4");
//! reader.open()?;
//!
//! let mut writer = FfmpegWriter::new("trailer.webm");
//! writer.set_audio_options(true, "libvorbis", 44100, 2, ChannelLayout::Stereo, 128_000);
//! writer.set_video_options(true, "libvpx", Fraction::new(24, 1), 720, 480, Fraction::new(1, 1), false, false, 300_000);
//! writer.info_mut().metadata.insert("title".into(), "testtest".into());
//! writer.open()?;
//!
//! writer.write_reader_frames(&mut reader, 1, 100)?;
//! writer.close()?;
//! reader.close();
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`core`] - fractions, keyframes, colors and the [`Frame`](core::Frame) type
//! - [`readers`] - frame sources and the [`Reader`](readers::Reader) trait
//! - [`writers`] - frame sinks and the [`Writer`](writers::Writer) trait
//! - [`effects`] - per-frame filters and the [`EffectRegistry`](effects::EffectRegistry)
//! - [`timeline`] - clips composed over time
//! - [`player`] - paced playback into a frame callback
//! - [`config`] - configuration management
//!
//! ## Custom Effects
//!
//! Implement [`Effect`](effects::Effect) and register it:
//!
//! ```rust,no_run
//! use reelkit::core::Frame;
//! use reelkit::effects::{Effect, EffectInfo, EffectRegistry, Placement};
//!
//! struct Darken {
//!     info: EffectInfo,
//!     placement: Placement,
//! }
//!
//! impl Effect for Darken {
//!     fn info(&self) -> &EffectInfo {
//!         &self.info
//!     }
//!     fn placement(&self) -> &Placement {
//!         &self.placement
//!     }
//!     fn placement_mut(&mut self) -> &mut Placement {
//!         &mut self.placement
//!     }
//!     fn apply(&mut self, frame: &mut Frame, _frame_number: i64) -> reelkit::Result<()> {
//!         for px in frame.image_mut().pixels_mut() {
//!             px[0] /= 2;
//!             px[1] /= 2;
//!             px[2] /= 2;
//!         }
//!         Ok(())
//!     }
//! }
//!
//! let mut registry = EffectRegistry::new();
//! registry.register("Darken", || {
//!     Box::new(Darken {
//!         info: EffectInfo::video("Darken", "Darken", "Halve every color channel."),
//!         placement: Placement::default(),
//!     })
//! });
//! ```

pub mod cache;
pub mod config;
pub mod core;
pub mod effects;
pub mod error;
pub mod player;
pub mod readers;
pub mod timeline;
pub mod writers;

// Re-export commonly used types for convenience
pub use crate::{
    config::Config,
    core::{Fraction, Frame, Keyframe},
    effects::{Effect, EffectRegistry},
    error::{ReelError, Result},
    player::{Player, Renderer},
    readers::Reader,
    timeline::{Clip, Timeline},
    writers::Writer,
};
