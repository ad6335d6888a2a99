//! Sinks for frames: encoded media files, animated GIFs and numbered stills

use std::collections::BTreeMap;
use std::io::{self, Write};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    core::{ChannelLayout, Fraction, Frame},
    error::Result,
    readers::{display_ratio, Reader, ReaderInfo},
};

pub mod ffmpeg;
pub mod image;
pub mod sequence;

pub use self::image::ImageWriter;
pub use ffmpeg::FfmpegWriter;
pub use sequence::ImageSequenceWriter;

/// Which encoder an extra option is meant for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamType {
    Video,
    Audio,
}

/// Output settings shared by every writer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriterInfo {
    pub has_video: bool,
    pub has_audio: bool,
    pub width: u32,
    pub height: u32,
    pub fps: Fraction,
    pub pixel_ratio: Fraction,
    pub display_ratio: Fraction,
    pub vcodec: String,
    /// Bits per second
    pub video_bit_rate: u64,
    pub video_length: i64,
    pub interlaced_frame: bool,
    pub top_field_first: bool,
    pub acodec: String,
    /// Bits per second
    pub audio_bit_rate: u64,
    pub sample_rate: u32,
    pub channels: u16,
    pub channel_layout: ChannelLayout,
    /// Container tags; setting a key twice keeps the last value
    pub metadata: BTreeMap<String, String>,
}

impl Default for WriterInfo {
    fn default() -> Self {
        Self {
            has_video: false,
            has_audio: false,
            width: 0,
            height: 0,
            fps: Fraction::default(),
            pixel_ratio: Fraction::default(),
            display_ratio: Fraction::default(),
            vcodec: String::new(),
            video_bit_rate: 0,
            video_length: 0,
            interlaced_frame: false,
            top_field_first: true,
            acodec: String::new(),
            audio_bit_rate: 0,
            sample_rate: 0,
            channels: 0,
            channel_layout: ChannelLayout::Mono,
            metadata: BTreeMap::new(),
        }
    }
}

impl WriterInfo {
    pub fn update_display_ratio(&mut self) {
        self.display_ratio = display_ratio(self.width, self.height, self.pixel_ratio);
    }
}

/// Anything that consumes frames in order.
///
/// [`Writer::write_frame`] before [`Writer::open`] fails with
/// `WriterError::WriterClosed`.
pub trait Writer {
    /// Output path (or pattern) for logs
    fn name(&self) -> &str;

    fn info(&self) -> &WriterInfo;

    fn info_mut(&mut self) -> &mut WriterInfo;

    fn open(&mut self) -> Result<()>;

    fn is_open(&self) -> bool;

    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Flush and finalise the output
    fn close(&mut self) -> Result<()>;

    /// Pump frames `start..=length` from a reader into this writer
    fn write_reader_frames(&mut self, reader: &mut dyn Reader, start: i64, length: i64) -> Result<()> {
        let start = start.max(1);
        info!("Writing frames {}..={} from {} to {}", start, length, reader.name(), self.name());

        for number in start..=length {
            let frame = reader.get_frame(number)?;
            self.write_frame(&frame)?;
            if number % 100 == 0 {
                debug!("Wrote frame {}", number);
            }
        }
        Ok(())
    }

    /// Adopt a reader's stream settings (size, rate, codecs, tags)
    fn copy_reader_info(&mut self, reader: &ReaderInfo) {
        let info = self.info_mut();
        info.has_video = reader.has_video;
        info.has_audio = reader.has_audio;
        info.width = reader.width;
        info.height = reader.height;
        info.fps = reader.fps;
        info.pixel_ratio = reader.pixel_ratio;
        info.display_ratio = reader.display_ratio;
        info.vcodec = reader.vcodec.clone();
        info.video_bit_rate = reader.video_bit_rate;
        info.video_length = reader.video_length;
        info.interlaced_frame = reader.interlaced_frame;
        info.top_field_first = reader.top_field_first;
        info.acodec = reader.acodec.clone();
        info.audio_bit_rate = reader.audio_bit_rate;
        info.sample_rate = reader.sample_rate;
        info.channels = reader.channels;
        info.channel_layout = reader.channel_layout;
        info.metadata = reader.metadata.clone();
    }

    /// Write a human readable report of [`Writer::info`]
    fn display_info(&self, out: &mut dyn Write) -> io::Result<()> {
        write_info(self.info(), out)
    }
}

fn fraction_line(f: Fraction) -> String {
    format!("{:.2} ({}/{})", f.to_f64(), f.num, f.den)
}

pub fn write_info(info: &WriterInfo, out: &mut dyn Write) -> io::Result<()> {
    let rule = "----------------------------";
    writeln!(out, "{}", rule)?;
    writeln!(out, "----- Output Settings ------")?;
    writeln!(out, "{}", rule)?;
    writeln!(out, "--> Has Video: {}", info.has_video)?;
    writeln!(out, "--> Has Audio: {}", info.has_audio)?;
    writeln!(out, "{}", rule)?;
    writeln!(out, "----- Video Attributes -----")?;
    writeln!(out, "{}", rule)?;
    writeln!(out, "--> Width: {}", info.width)?;
    writeln!(out, "--> Height: {}", info.height)?;
    writeln!(out, "--> Frames Per Second: {}", fraction_line(info.fps))?;
    writeln!(out, "--> Video Bit Rate: {} kb/s", info.video_bit_rate / 1000)?;
    writeln!(out, "--> Pixel Ratio: {}", fraction_line(info.pixel_ratio))?;
    writeln!(out, "--> Display Aspect Ratio: {}", fraction_line(info.display_ratio))?;
    writeln!(out, "--> Video Codec: {}", info.vcodec)?;
    writeln!(out, "--> Video Length: {} Frames", info.video_length)?;
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
    writeln!(out, "{}", rule)?;
    writeln!(out, "--------- Metadata ---------")?;
    writeln!(out, "{}", rule)?;
    for (key, value) in &info.metadata {
        writeln!(out, "--> {}: {}", key, value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readers::DummyReader;

    /// Records frame numbers instead of encoding
    #[derive(Default)]
    struct RecordingWriter {
        info: WriterInfo,
        open: bool,
        written: Vec<i64>,
    }

    impl Writer for RecordingWriter {
        fn name(&self) -> &str {
            "recording"
        }
        fn info(&self) -> &WriterInfo {
            &self.info
        }
        fn info_mut(&mut self) -> &mut WriterInfo {
            &mut self.info
        }
        fn open(&mut self) -> Result<()> {
            self.open = true;
            Ok(())
        }
        fn is_open(&self) -> bool {
            self.open
        }
        fn write_frame(&mut self, frame: &Frame) -> Result<()> {
            self.written.push(frame.number);
            Ok(())
        }
        fn close(&mut self) -> Result<()> {
            self.open = false;
            Ok(())
        }
    }

    #[test]
    fn test_frame_pump_clamps_start() {
        let mut reader = DummyReader::new(Fraction::new(30, 1), 8, 8, 44100, 2, 10.0);
        reader.open().unwrap();

        let mut writer = RecordingWriter::default();
        writer.open().unwrap();
        writer.write_reader_frames(&mut reader, 0, 5).unwrap();
        assert_eq!(writer.written, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_copy_reader_info() {
        let mut reader = DummyReader::new(Fraction::new(24, 1), 720, 480, 48000, 2, 2.0);
        reader.open().unwrap();

        let mut writer = RecordingWriter::default();
        writer.copy_reader_info(reader.info());
        assert_eq!(writer.info().fps, Fraction::new(24, 1));
        assert_eq!(writer.info().sample_rate, 48000);
        assert_eq!(writer.info().display_ratio, Fraction::new(3, 2));

        let mut out = Vec::new();
        writer.display_info(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("--> Width: 720"));
        assert!(text.contains("--> Sample Rate: 48000 Hz"));
    }
}
