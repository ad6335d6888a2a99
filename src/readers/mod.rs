//! Sources of frames: media files, still images, rendered HTML and
//! re-timed wrappers around other readers

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    core::{ChannelLayout, Fraction, Frame},
    error::Result,
};

pub mod dummy;
pub mod ffmpeg;
pub mod frame_mapper;
pub mod html;
pub mod image;

pub use dummy::DummyReader;
pub use ffmpeg::FfmpegReader;
pub use frame_mapper::{map_to_fps, FrameMapper};
pub use html::HtmlReader;
pub use self::image::ImageReader;

/// Everything known about a reader's streams once it is open
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReaderInfo {
    pub has_video: bool,
    pub has_audio: bool,
    pub has_single_image: bool,
    /// Seconds
    pub duration: f64,
    /// Bytes
    pub file_size: u64,
    pub width: u32,
    pub height: u32,
    pub pixel_format: String,
    pub fps: Fraction,
    /// Bits per second
    pub video_bit_rate: u64,
    pub pixel_ratio: Fraction,
    pub display_ratio: Fraction,
    pub vcodec: String,
    pub video_length: i64,
    pub video_stream_index: i32,
    pub video_timebase: Fraction,
    pub interlaced_frame: bool,
    pub top_field_first: bool,
    pub acodec: String,
    /// Bits per second
    pub audio_bit_rate: u64,
    pub sample_rate: u32,
    pub channels: u16,
    pub channel_layout: ChannelLayout,
    pub audio_stream_index: i32,
    pub audio_timebase: Fraction,
    pub metadata: BTreeMap<String, String>,
}

impl Default for ReaderInfo {
    fn default() -> Self {
        Self {
            has_video: false,
            has_audio: false,
            has_single_image: false,
            duration: 0.0,
            file_size: 0,
            width: 0,
            height: 0,
            pixel_format: String::new(),
            fps: Fraction::default(),
            video_bit_rate: 0,
            pixel_ratio: Fraction::default(),
            display_ratio: Fraction::default(),
            vcodec: String::new(),
            video_length: 0,
            video_stream_index: -1,
            video_timebase: Fraction::default(),
            interlaced_frame: false,
            top_field_first: true,
            acodec: String::new(),
            audio_bit_rate: 0,
            sample_rate: 0,
            channels: 0,
            channel_layout: ChannelLayout::Mono,
            audio_stream_index: -1,
            audio_timebase: Fraction::default(),
            metadata: BTreeMap::new(),
        }
    }
}

impl ReaderInfo {
    /// Recompute `display_ratio` from the size and pixel ratio
    pub fn update_display_ratio(&mut self) {
        self.display_ratio = display_ratio(self.width, self.height, self.pixel_ratio);
    }

    /// Recompute `video_length` from duration and fps
    pub fn update_video_length(&mut self) {
        self.video_length = (self.duration * self.fps.to_f64()).round() as i64;
    }
}

/// Reduced width:height ratio after applying the pixel aspect ratio
pub fn display_ratio(width: u32, height: u32, pixel_ratio: Fraction) -> Fraction {
    let num = width as i64 * pixel_ratio.num as i64;
    let den = height as i64 * pixel_ratio.den as i64;
    let mut ratio = Fraction::new(
        num.clamp(i32::MIN as i64, i32::MAX as i64) as i32,
        den.clamp(i32::MIN as i64, i32::MAX as i64) as i32,
    );
    ratio.reduce();
    ratio
}

/// Anything that produces numbered frames.
///
/// Frame numbers are 1-based; numbers below 1 are treated as frame 1.
/// Calling [`Reader::get_frame`] before [`Reader::open`] fails with
/// `ReaderError::ReaderClosed`.
pub trait Reader: Send {
    /// Short name for logs (file path, "dummy", ...)
    fn name(&self) -> &str;

    fn info(&self) -> &ReaderInfo;

    fn open(&mut self) -> Result<()>;

    fn close(&mut self);

    fn is_open(&self) -> bool;

    fn get_frame(&mut self, number: i64) -> Result<Arc<Frame>>;

    /// Write a human readable report of [`Reader::info`]
    fn display_info(&self, out: &mut dyn Write) -> io::Result<()> {
        write_info(self.info(), out)
    }
}

fn fraction_line(f: Fraction) -> String {
    format!("{:.2} ({}/{})", f.to_f64(), f.num, f.den)
}

/// Block report shared by every reader
pub fn write_info(info: &ReaderInfo, out: &mut dyn Write) -> io::Result<()> {
    let rule = "----------------------------";
    writeln!(out, "{}", rule)?;
    writeln!(out, "----- File Information -----")?;
    writeln!(out, "{}", rule)?;
    writeln!(out, "--> Has Video: {}", info.has_video)?;
    writeln!(out, "--> Has Audio: {}", info.has_audio)?;
    writeln!(out, "--> Has Single Image: {}", info.has_single_image)?;
    writeln!(out, "--> Duration: {:.2} Seconds", info.duration)?;
    writeln!(out, "--> File Size: {:.2} MB", info.file_size as f64 / 1024.0 / 1024.0)?;
    writeln!(out, "{}", rule)?;
    writeln!(out, "----- Video Attributes -----")?;
    writeln!(out, "{}", rule)?;
    writeln!(out, "--> Width: {}", info.width)?;
    writeln!(out, "--> Height: {}", info.height)?;
    writeln!(out, "--> Pixel Format: {}", info.pixel_format)?;
    writeln!(out, "--> Frames Per Second: {}", fraction_line(info.fps))?;
    writeln!(out, "--> Video Bit Rate: {} kb/s", info.video_bit_rate / 1000)?;
    writeln!(out, "--> Pixel Ratio: {}", fraction_line(info.pixel_ratio))?;
    writeln!(out, "--> Display Aspect Ratio: {}", fraction_line(info.display_ratio))?;
    writeln!(out, "--> Video Codec: {}", info.vcodec)?;
    writeln!(out, "--> Video Length: {} Frames", info.video_length)?;
    writeln!(out, "--> Video Stream Index: {}", info.video_stream_index)?;
    writeln!(out, "--> Video Timebase: {}", fraction_line(info.video_timebase))?;
    writeln!(out, "--> Interlaced: {}", info.interlaced_frame)?;
    writeln!(out, "--> Interlaced: Top Field First: {}", info.top_field_first)?;
    writeln!(out, "{}", rule)?;
    writeln!(out, "----- Audio Attributes -----")?;
    writeln!(out, "{}", rule)?;
    writeln!(out, "--> Audio Codec: {}", info.acodec)?;
    writeln!(out, "--> Audio Bit Rate: {} kb/s", info.audio_bit_rate / 1000)?;
    writeln!(out, "--> Sample Rate: {} Hz", info.sample_rate)?;
    writeln!(out, "--> # of Channels: {}", info.channels)?;
    writeln!(out, "--> Channel Layout: {}", info.channel_layout)?;
    writeln!(out, "--> Audio Stream Index: {}", info.audio_stream_index)?;
    writeln!(out, "--> Audio Timebase: {}", fraction_line(info.audio_timebase))?;
    writeln!(out, "{}", rule)?;
    writeln!(out, "--------- Metadata ---------")?;
    writeln!(out, "{}", rule)?;
    for (key, value) in &info.metadata {
        writeln!(out, "--> {}: {}", key, value)?;
    }
    Ok(())
}

/// Open a reader for `path`, picking the implementation from the extension
pub fn open_path(path: &str, ffmpeg: &crate::config::FfmpegConfig) -> Result<Box<dyn Reader>> {
    let mut reader: Box<dyn Reader> = if self::image::is_still_image(path) {
        Box::new(ImageReader::new(path))
    } else {
        Box::new(FfmpegReader::with_config(path, ffmpeg.clone()))
    };
    reader.open()?;
    Ok(reader)
}
