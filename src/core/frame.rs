use std::path::Path;

use image::{imageops, imageops::FilterType, ImageBuffer, Rgba, RgbaImage};

use crate::{
    core::{ChannelLayout, Fraction},
    error::{ReaderError, Result},
};

/// A single decoded frame: an RGBA image plus the audio samples that play
/// while it is on screen.
///
/// Frame numbers are 1-based. Pixels are straight (not premultiplied) alpha.
/// Audio is stored planar, one `Vec<f32>` per channel, in the -1.0..1.0 range.
#[derive(Clone, Debug)]
pub struct Frame {
    pub number: i64,
    image: RgbaImage,
    audio: Vec<Vec<f32>>,
    sample_rate: u32,
    channel_layout: ChannelLayout,
    pub pixel_ratio: Fraction,
}

impl Frame {
    /// Create a frame filled with `color` and `samples` samples of silence per channel
    pub fn new(number: i64, width: u32, height: u32, color: [u8; 4], samples: usize, channels: u16) -> Self {
        Self {
            number,
            image: ImageBuffer::from_pixel(width, height, Rgba(color)),
            audio: vec![vec![0.0; samples]; channels as usize],
            sample_rate: 44100,
            channel_layout: ChannelLayout::from_channels(channels),
            pixel_ratio: Fraction::default(),
        }
    }

    /// Wrap an existing image, with no audio
    pub fn from_image(number: i64, image: RgbaImage) -> Self {
        Self {
            number,
            image,
            audio: Vec::new(),
            sample_rate: 44100,
            channel_layout: ChannelLayout::Stereo,
            pixel_ratio: Fraction::default(),
        }
    }

    /// Build from tightly packed RGBA bytes
    pub fn from_rgba_bytes(number: i64, width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let image = ImageBuffer::from_raw(width, height, data).ok_or_else(|| ReaderError::InvalidFormat {
            details: format!("buffer does not hold a {}x{} RGBA image", width, height),
        })?;
        Ok(Self::from_image(number, image))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn get_pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.image.get_pixel(x, y).0
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, color: [u8; 4]) {
        self.image.put_pixel(x, y, Rgba(color));
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbaImage {
        &mut self.image
    }

    /// Raw RGBA bytes, row major
    pub fn rgba_bytes(&self) -> &[u8] {
        self.image.as_raw()
    }

    /// Replace the image with a solid color
    pub fn add_color(&mut self, width: u32, height: u32, color: [u8; 4]) {
        self.image = ImageBuffer::from_pixel(width, height, Rgba(color));
    }

    /// Replace the image
    pub fn add_image(&mut self, image: RgbaImage) {
        self.image = image;
    }

    /// Mix `source` into `channel` starting at `start`, growing the buffers
    /// as needed. With `replace` the destination range is cleared first.
    pub fn add_audio(&mut self, replace: bool, channel: usize, start: usize, source: &[f32], gain: f32) {
        if channel >= self.audio.len() {
            let len = self.sample_count();
            self.audio.resize(channel + 1, vec![0.0; len]);
            self.channel_layout = ChannelLayout::from_channels(self.audio.len() as u16);
        }

        let new_len = start + source.len();
        if new_len > self.sample_count() {
            for ch in &mut self.audio {
                ch.resize(new_len, 0.0);
            }
        }

        let dest = &mut self.audio[channel][start..new_len];
        for (d, s) in dest.iter_mut().zip(source) {
            if replace {
                *d = s * gain;
            } else {
                *d += s * gain;
            }
        }
    }

    /// Reset every channel to `samples` samples of silence
    pub fn add_audio_silence(&mut self, samples: usize) {
        for ch in &mut self.audio {
            ch.clear();
            ch.resize(samples, 0.0);
        }
    }

    /// Resize the audio layout, discarding current samples
    pub fn resize_audio(&mut self, channels: u16, samples: usize, sample_rate: u32, layout: ChannelLayout) {
        self.audio = vec![vec![0.0; samples]; channels as usize];
        self.sample_rate = sample_rate;
        self.channel_layout = layout;
    }

    pub fn apply_gain(&mut self, gain: f32) {
        for ch in &mut self.audio {
            for s in ch.iter_mut() {
                *s *= gain;
            }
        }
    }

    /// Samples of one channel; empty when the channel does not exist
    pub fn audio_samples(&self, channel: usize) -> &[f32] {
        self.audio.get(channel).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Samples interleaved L R L R ...
    pub fn interleaved_samples(&self) -> Vec<f32> {
        let count = self.sample_count();
        let mut out = Vec::with_capacity(count * self.audio.len());
        for i in 0..count {
            for ch in &self.audio {
                out.push(ch.get(i).copied().unwrap_or(0.0));
            }
        }
        out
    }

    pub fn sample_count(&self) -> usize {
        self.audio.first().map(Vec::len).unwrap_or(0)
    }

    pub fn channels(&self) -> u16 {
        self.audio.len() as u16
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
    }

    pub fn channel_layout(&self) -> ChannelLayout {
        self.channel_layout
    }

    pub fn set_channel_layout(&mut self, layout: ChannelLayout) {
        self.channel_layout = layout;
    }

    /// Approximate memory held by this frame
    pub fn get_bytes(&self) -> u64 {
        let image = self.image.as_raw().len() as u64;
        let audio = (self.sample_count() * self.audio.len() * std::mem::size_of::<f32>()) as u64;
        image + audio
    }

    /// Number of audio samples that belong to frame `number`.
    ///
    /// Rates rarely divide evenly into frames, so consecutive frames differ
    /// by a sample here and there; the running total always matches
    /// `sample_rate * seconds`.
    pub fn samples_per_frame(number: i64, fps: Fraction, sample_rate: u32, channels: u16) -> usize {
        let fps_rate = fps.reciprocal().to_f64();
        let channels = channels.max(1) as f64;
        let per_frame = sample_rate as f64 * fps_rate;

        let mut previous = per_frame * (number - 1) as f64;
        previous -= previous % channels;

        let mut total = per_frame * number as f64;
        total -= total % channels;

        let samples = (total - previous).round();
        if samples < 0.0 { 0 } else { samples as usize }
    }

    /// Save the image, format picked from the extension.
    ///
    /// A scale more than 0.001 away from 1.0 resizes the output, after
    /// correcting non-square pixels.
    pub fn save<P: AsRef<Path>>(&self, path: P, scale: f32) -> Result<()> {
        let scale = scale.abs();
        if (scale - 1.0).abs() <= 0.001 {
            self.image.save(path)?;
            return Ok(());
        }

        let mut image = self.image.clone();
        if self.pixel_ratio.num != 1 || self.pixel_ratio.den != 1 {
            let corrected = (image.height() as f64 * self.pixel_ratio.reciprocal().to_f64()).round().max(1.0) as u32;
            image = imageops::resize(&image, image.width(), corrected, FilterType::Triangle);
        }

        let width = ((image.width() as f32 * scale).round() as u32).max(1);
        let height = ((image.height() as f32 * scale).round() as u32).max(1);
        let resized = imageops::resize(&image, width, height, FilterType::Triangle);
        resized.save(path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_new_frame() {
        let frame = Frame::new(3, 4, 2, [10, 20, 30, 255], 100, 2);
        assert_eq!(frame.number, 3);
        assert_eq!((frame.width(), frame.height()), (4, 2));
        assert_eq!(frame.get_pixel(3, 1), [10, 20, 30, 255]);
        assert_eq!(frame.sample_count(), 100);
        assert_eq!(frame.channels(), 2);
        assert_eq!(frame.get_bytes(), 4 * 2 * 4 + 100 * 2 * 4);
    }

    #[test]
    fn test_samples_per_frame() {
        let fps = Fraction::new(30, 1);
        assert_eq!(Frame::samples_per_frame(1, fps, 44100, 2), 1470);

        // 29.97 fps does not divide 48 kHz evenly; totals still add up
        let ntsc = Fraction::new(30000, 1001);
        let total: usize = (1..=30000).map(|n| Frame::samples_per_frame(n, ntsc, 48000, 2)).sum();
        let expected = (48000.0 * 30000.0 * 1001.0 / 30000.0) as usize;
        assert!((total as i64 - expected as i64).abs() <= 2);
    }

    #[test]
    fn test_add_audio_grows_and_mixes() {
        let mut frame = Frame::new(1, 2, 2, [0, 0, 0, 255], 0, 1);
        frame.add_audio(true, 0, 0, &[0.5, 0.5], 1.0);
        frame.add_audio(false, 0, 1, &[0.25, 0.25], 2.0);
        assert_eq!(frame.audio_samples(0), &[0.5, 1.0, 0.5]);

        frame.add_audio(true, 1, 0, &[0.1], 1.0);
        assert_eq!(frame.channels(), 2);
        assert_eq!(frame.interleaved_samples(), vec![0.5, 0.1, 1.0, 0.0, 0.5, 0.0]);

        frame.apply_gain(0.0);
        assert!(frame.audio_samples(0).iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_save_scaled() {
        let dir = tempdir().unwrap();
        let frame = Frame::new(1, 40, 20, [255, 0, 0, 255], 0, 2);

        let full = dir.path().join("full.png");
        frame.save(&full, 1.0).unwrap();
        assert_eq!(image::open(&full).unwrap().width(), 40);

        let half = dir.path().join("half.png");
        frame.save(&half, 0.5).unwrap();
        let img = image::open(&half).unwrap();
        assert_eq!((img.width(), img.height()), (20, 10));
    }

    #[test]
    fn test_from_bytes_checks_size() {
        assert!(Frame::from_rgba_bytes(1, 2, 2, vec![0; 16]).is_ok());
        assert!(Frame::from_rgba_bytes(1, 2, 2, vec![0; 15]).is_err());
    }
}
