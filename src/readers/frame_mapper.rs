use std::sync::Arc;

use tracing::{debug, info};

use crate::{
    cache::FrameCache,
    config::CacheConfig,
    core::{Fraction, Frame},
    error::{ReaderError, Result},
    readers::{Reader, ReaderInfo},
};

/// Samples (per channel) played before frame `frames + 1` starts. Matches the
/// running total of [`Frame::samples_per_frame`].
fn cumulative_samples(frames: i64, fps: Fraction, sample_rate: u32, channels: u16) -> i64 {
    if frames <= 0 {
        return 0;
    }
    let channels = channels.max(1) as f64;
    let total = sample_rate as f64 * fps.reciprocal().to_f64() * frames as f64;
    (total - total % channels).round() as i64
}

/// Source frame whose sample window holds absolute sample `sample`
fn frame_for_sample(sample: i64, fps: Fraction, sample_rate: u32, channels: u16) -> i64 {
    let per_frame = sample_rate as f64 / fps.to_f64().max(f64::EPSILON);
    let mut frame = (sample as f64 / per_frame.max(1.0)).floor() as i64 + 1;
    while frame > 1 && cumulative_samples(frame - 1, fps, sample_rate, channels) > sample {
        frame -= 1;
    }
    while cumulative_samples(frame, fps, sample_rate, channels) <= sample {
        frame += 1;
    }
    frame
}

/// Wrap `reader` in a [`FrameMapper`] when its frame rate differs from `fps`.
/// Stills and readers without a usable rate are returned unchanged.
pub fn map_to_fps(reader: Box<dyn Reader>, fps: Fraction) -> Box<dyn Reader> {
    let info = reader.info();
    if info.has_single_image || info.fps == fps || info.fps.num <= 0 || info.fps.den <= 0 {
        return reader;
    }
    debug!("Mapping {} from {} to {} fps", reader.name(), info.fps, fps);
    Box::new(FrameMapper::new(reader, fps))
}

/// Re-times another reader to a different frame rate.
///
/// Images come from the nearest source frame. Audio is cut from the source
/// stream so that each target frame carries exactly its own sample window.
pub struct FrameMapper {
    reader: Box<dyn Reader>,
    target_fps: Fraction,
    name: String,
    info: ReaderInfo,
    cache: FrameCache,
}

impl FrameMapper {
    pub fn new(reader: Box<dyn Reader>, target_fps: Fraction) -> Self {
        let name = format!("{} @ {}", reader.name(), target_fps);
        let mut mapper = Self {
            reader,
            target_fps,
            name,
            info: ReaderInfo::default(),
            cache: FrameCache::new(CacheConfig::default().max_bytes),
        };
        mapper.update_info();
        mapper
    }

    pub fn target_fps(&self) -> Fraction {
        self.target_fps
    }

    pub fn reader(&self) -> &dyn Reader {
        self.reader.as_ref()
    }

    pub fn into_inner(self) -> Box<dyn Reader> {
        self.reader
    }

    /// Source frame shown for target frame `number`
    pub fn source_frame(&self, number: i64) -> i64 {
        let source_fps = self.reader.info().fps.to_f64();
        let target_fps = self.target_fps.to_f64();
        if target_fps <= 0.0 {
            return number.max(1);
        }

        let mut source = ((number.max(1) - 1) as f64 * source_fps / target_fps).round() as i64 + 1;
        let source_length = self.reader.info().video_length;
        if source_length > 0 {
            source = source.min(source_length);
        }
        source.max(1)
    }

    /// Both rates must be positive for frames and sample windows to line up
    fn check_rates(&self) -> Result<()> {
        let source = self.reader.info().fps;
        for (label, fps) in [("source", source), ("target", self.target_fps)] {
            if fps.num <= 0 || fps.den <= 0 {
                return Err(ReaderError::InvalidFormat {
                    details: format!("cannot map {} at {} fps ({} rate must be positive)", self.reader.name(), fps, label),
                }
                .into());
            }
        }
        Ok(())
    }

    fn is_passthrough(&self) -> bool {
        self.reader.info().fps == self.target_fps
    }

    fn update_info(&mut self) {
        let mut info = self.reader.info().clone();
        info.fps = self.target_fps;
        info.video_timebase = self.target_fps.reciprocal();
        info.update_video_length();
        self.info = info;
    }

    /// Copy this frame's sample window out of the source frames
    fn map_audio(&mut self, number: i64, frame: &mut Frame) -> Result<()> {
        let source = self.reader.info().clone();
        let (rate, channels) = (source.sample_rate, source.channels);

        let start = cumulative_samples(number - 1, self.target_fps, rate, channels);
        let end = cumulative_samples(number, self.target_fps, rate, channels);
        frame.resize_audio(channels, (end - start).max(0) as usize, rate, source.channel_layout);

        let mut position = start;
        let mut source_number = frame_for_sample(start, source.fps, rate, channels);
        while position < end {
            let source_start = cumulative_samples(source_number - 1, source.fps, rate, channels);
            let source_end = cumulative_samples(source_number, source.fps, rate, channels);
            let take = (end - position).min(source_end - position);
            if take <= 0 {
                source_number += 1;
                continue;
            }

            let source_frame = self.reader.get_frame(source_number)?;
            let offset = (position - source_start) as usize;
            let dest = (position - start) as usize;
            for channel in 0..channels as usize {
                let samples = source_frame.audio_samples(channel);
                let from = offset.min(samples.len());
                let to = (offset + take as usize).min(samples.len());
                frame.add_audio(true, channel, dest, &samples[from..to], 1.0);
            }

            position += take;
            source_number += 1;
        }
        Ok(())
    }
}

impl Reader for FrameMapper {
    fn name(&self) -> &str {
        &self.name
    }

    fn info(&self) -> &ReaderInfo {
        &self.info
    }

    fn open(&mut self) -> Result<()> {
        self.reader.open()?;
        self.check_rates()?;
        self.update_info();
        info!(
            "Mapping {} from {} to {} fps ({} frames)",
            self.reader.name(),
            self.reader.info().fps,
            self.target_fps,
            self.info.video_length
        );
        Ok(())
    }

    fn close(&mut self) {
        self.cache.clear();
        self.reader.close();
    }

    fn is_open(&self) -> bool {
        self.reader.is_open()
    }

    fn get_frame(&mut self, number: i64) -> Result<Arc<Frame>> {
        if !self.reader.is_open() {
            return Err(ReaderError::ReaderClosed { path: self.name.clone() }.into());
        }
        self.check_rates()?;

        let mut number = number.max(1);
        if self.info.video_length > 0 {
            number = number.min(self.info.video_length);
        }
        if self.is_passthrough() {
            return self.reader.get_frame(number);
        }
        if let Some(frame) = self.cache.get(number) {
            return Ok(frame);
        }

        let source_number = self.source_frame(number);
        debug!("Mapped frame {} -> source frame {}", number, source_number);
        let source = self.reader.get_frame(source_number)?;

        let mut frame = Frame::from_image(number, source.image().clone());
        frame.pixel_ratio = source.pixel_ratio;
        if self.reader.info().has_audio && self.reader.info().sample_rate > 0 {
            self.map_audio(number, &mut frame)?;
        }

        let frame = Arc::new(frame);
        self.cache.add(frame.clone());
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readers::DummyReader;

    /// 1 second of 24 fps mono audio where every sample holds its absolute index
    fn ramp_reader() -> DummyReader {
        let fps = Fraction::new(24, 1);
        let mut cache = FrameCache::new(0);
        let mut position = 0usize;
        for n in 1..=24 {
            let samples = Frame::samples_per_frame(n, fps, 48000, 1);
            let shade = (n * 10) as u8;
            let mut frame = Frame::new(n, 4, 4, [shade, 0, 0, 255], 0, 1);
            let ramp: Vec<f32> = (position..position + samples).map(|s| s as f32).collect();
            frame.add_audio(true, 0, 0, &ramp, 1.0);
            position += samples;
            cache.add(Arc::new(frame));
        }
        DummyReader::new(fps, 4, 4, 48000, 1, 1.0).with_cache(cache)
    }

    #[test]
    fn test_cumulative_samples() {
        let fps = Fraction::new(30, 1);
        assert_eq!(cumulative_samples(0, fps, 44100, 2), 0);
        assert_eq!(cumulative_samples(1, fps, 44100, 2), 1470);
        let total: usize = (1..=10).map(|n| Frame::samples_per_frame(n, fps, 44100, 2)).sum();
        assert_eq!(cumulative_samples(10, fps, 44100, 2), total as i64);
        assert_eq!(frame_for_sample(1469, fps, 44100, 2), 1);
        assert_eq!(frame_for_sample(1470, fps, 44100, 2), 2);
    }

    #[test]
    fn test_info_and_source_frames() {
        let mut mapper = FrameMapper::new(Box::new(ramp_reader()), Fraction::new(30, 1));
        mapper.open().unwrap();

        assert_eq!(mapper.info().video_length, 30);
        assert_eq!(mapper.info().video_timebase, Fraction::new(1, 30));
        assert_eq!(mapper.source_frame(1), 1);
        assert_eq!(mapper.source_frame(6), 5);
        assert_eq!(mapper.source_frame(30), 24);
    }

    #[test]
    fn test_images_follow_nearest_source() {
        let mut mapper = FrameMapper::new(Box::new(ramp_reader()), Fraction::new(30, 1));
        mapper.open().unwrap();

        let frame = mapper.get_frame(6).unwrap();
        assert_eq!(frame.number, 6);
        assert_eq!(frame.get_pixel(0, 0), [50, 0, 0, 255]);
    }

    #[test]
    fn test_audio_is_continuous() {
        let mut mapper = FrameMapper::new(Box::new(ramp_reader()), Fraction::new(30, 1));
        mapper.open().unwrap();

        let mut all = Vec::new();
        for n in 1..=30 {
            let frame = mapper.get_frame(n).unwrap();
            assert_eq!(frame.sample_count(), 1600);
            all.extend_from_slice(frame.audio_samples(0));
        }
        assert_eq!(all.len(), 48000);
        assert!(all.iter().enumerate().all(|(i, s)| *s == i as f32));
    }

    #[test]
    fn test_map_to_fps() {
        let same = map_to_fps(Box::new(ramp_reader()), Fraction::new(24, 1));
        assert_eq!(same.name(), "dummy");

        let mut source = ramp_reader();
        source.open().unwrap();
        let mut mapped = map_to_fps(Box::new(source), Fraction::new(30, 1));
        assert_eq!(mapped.info().fps, Fraction::new(30, 1));
        assert_eq!(mapped.info().video_length, 30);
        assert_eq!(mapped.get_frame(30).unwrap().get_pixel(0, 0), [240, 0, 0, 255]);

        let zero = map_to_fps(Box::new(DummyReader::new(Fraction::new(0, 1), 4, 4, 0, 0, 1.0)), Fraction::new(30, 1));
        assert_eq!(zero.info().fps, Fraction::new(0, 1));
    }

    #[test]
    fn test_zero_source_rate_is_rejected() {
        let source = DummyReader::new(Fraction::new(0, 1), 4, 4, 48000, 1, 1.0);
        let mut mapper = FrameMapper::new(Box::new(source), Fraction::new(30, 1));
        assert!(matches!(
            mapper.open(),
            Err(crate::error::ReelError::Reader(ReaderError::InvalidFormat { .. }))
        ));

        // Already-open sources fail on the first request instead of spinning
        let mut source = DummyReader::new(Fraction::new(0, 1), 4, 4, 48000, 1, 1.0);
        source.open().unwrap();
        let mut mapper = FrameMapper::new(Box::new(source), Fraction::new(30, 1));
        assert!(mapper.get_frame(2).is_err());
    }

    #[test]
    fn test_closed_inner_reader() {
        let mut mapper = FrameMapper::new(Box::new(ramp_reader()), Fraction::new(30, 1));
        assert!(mapper.get_frame(1).is_err());
    }
}
