use std::sync::Arc;

use tracing::debug;

use crate::{
    cache::FrameCache,
    core::{ChannelLayout, Fraction, Frame},
    error::{ReaderError, Result},
    readers::{Reader, ReaderInfo},
};

/// Generates solid frames with silent audio, or serves frames from a
/// pre-filled cache. Useful as a placeholder clip and in tests.
pub struct DummyReader {
    info: ReaderInfo,
    color: [u8; 4],
    cache: Option<FrameCache>,
    is_open: bool,
}

impl DummyReader {
    pub fn new(fps: Fraction, width: u32, height: u32, sample_rate: u32, channels: u16, duration: f64) -> Self {
        let mut info = ReaderInfo {
            has_video: true,
            has_audio: channels > 0 && sample_rate > 0,
            file_size: width as u64 * height as u64 * 4,
            vcodec: "raw".to_string(),
            pixel_format: "rgba".to_string(),
            width,
            height,
            duration,
            fps,
            video_timebase: fps.reciprocal(),
            sample_rate,
            channels,
            channel_layout: ChannelLayout::from_channels(channels),
            acodec: "raw".to_string(),
            audio_timebase: Fraction::new(1, sample_rate.max(1) as i32),
            ..Default::default()
        };
        info.update_video_length();
        info.update_display_ratio();

        Self {
            info,
            color: [0, 0, 0, 255],
            cache: None,
            is_open: false,
        }
    }

    /// Fill generated frames with `color` instead of black
    pub fn with_color(mut self, color: [u8; 4]) -> Self {
        self.color = color;
        self
    }

    /// Serve these frames where present; other numbers fall back to generated frames
    pub fn with_cache(mut self, cache: FrameCache) -> Self {
        self.cache = Some(cache);
        self
    }
}

impl Reader for DummyReader {
    fn name(&self) -> &str {
        "dummy"
    }

    fn info(&self) -> &ReaderInfo {
        &self.info
    }

    fn open(&mut self) -> Result<()> {
        if !self.is_open {
            debug!("Opening dummy reader {}x{} @ {}", self.info.width, self.info.height, self.info.fps);
            self.is_open = true;
        }
        Ok(())
    }

    fn close(&mut self) {
        self.is_open = false;
    }

    fn is_open(&self) -> bool {
        self.is_open
    }

    fn get_frame(&mut self, number: i64) -> Result<Arc<Frame>> {
        if !self.is_open {
            return Err(ReaderError::ReaderClosed { path: self.name().to_string() }.into());
        }
        let number = number.max(1);

        if let Some(frame) = self.cache.as_ref().and_then(|c| c.get(number)) {
            return Ok(frame);
        }

        let samples = Frame::samples_per_frame(number, self.info.fps, self.info.sample_rate, self.info.channels);
        let mut frame = Frame::new(number, self.info.width, self.info.height, self.color, samples, self.info.channels);
        frame.set_sample_rate(self.info.sample_rate);
        frame.set_channel_layout(self.info.channel_layout);
        Ok(Arc::new(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info() {
        let reader = DummyReader::new(Fraction::new(30, 1), 1920, 1080, 44100, 2, 10.0);
        let info = reader.info();
        assert_eq!(info.video_length, 300);
        assert_eq!(info.display_ratio, Fraction::new(16, 9));
        assert_eq!(info.video_timebase, Fraction::new(1, 30));
    }

    #[test]
    fn test_closed_reader_errors() {
        let mut reader = DummyReader::new(Fraction::new(30, 1), 16, 16, 44100, 2, 1.0);
        assert!(reader.get_frame(1).is_err());
        reader.open().unwrap();
        assert!(reader.get_frame(1).is_ok());
        reader.close();
        assert!(reader.get_frame(1).is_err());
    }

    #[test]
    fn test_generated_frames() {
        let mut reader = DummyReader::new(Fraction::new(30, 1), 8, 4, 44100, 2, 1.0).with_color([255, 0, 0, 255]);
        reader.open().unwrap();

        let frame = reader.get_frame(0).unwrap();
        assert_eq!(frame.number, 1);
        assert_eq!(frame.get_pixel(0, 0), [255, 0, 0, 255]);
        assert_eq!(frame.sample_count(), 1470);
    }

    #[test]
    fn test_cached_frames_win() {
        let mut cache = FrameCache::new(0);
        cache.add(Arc::new(Frame::new(2, 8, 4, [0, 0, 255, 255], 0, 2)));

        let mut reader = DummyReader::new(Fraction::new(30, 1), 8, 4, 44100, 2, 1.0).with_cache(cache);
        reader.open().unwrap();

        assert_eq!(reader.get_frame(2).unwrap().get_pixel(0, 0), [0, 0, 255, 255]);
        assert_eq!(reader.get_frame(3).unwrap().get_pixel(0, 0), [0, 0, 0, 255]);
    }
}
