use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use image::{
    codecs::gif::{GifEncoder, Repeat},
    imageops::{self, FilterType},
    Delay,
};
use tracing::{debug, info};

use crate::{
    core::{Fraction, Frame},
    error::{Result, WriterError},
    writers::{Writer, WriterInfo},
};

/// Writes frames as an animated GIF
pub struct ImageWriter {
    path: PathBuf,
    name: String,
    info: WriterInfo,
    loops: Option<u16>,
    repeat: u32,
    encoder: Option<GifEncoder<BufWriter<File>>>,
}

impl ImageWriter {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut info = WriterInfo {
            has_video: true,
            vcodec: "gif".to_string(),
            fps: Fraction::new(24, 1),
            ..Default::default()
        };
        info.update_display_ratio();
        Self {
            name: path.display().to_string(),
            path,
            info,
            loops: None,
            repeat: 1,
            encoder: None,
        }
    }

    /// `loops` of `None` repeats forever. Every frame is shown `repeat` times.
    pub fn set_video_options(&mut self, fps: Fraction, width: u32, height: u32, loops: Option<u16>, repeat: u32) {
        self.info.fps = fps;
        self.info.width = width;
        self.info.height = height;
        self.info.update_display_ratio();
        self.loops = loops;
        self.repeat = repeat.max(1);
    }

    /// Display time of one frame
    fn frame_delay(&self) -> Delay {
        let fps = self.info.fps;
        // GIF delays are stored in hundredths of a second
        Delay::from_numer_denom_ms(1000 * fps.den.max(1) as u32, fps.num.max(1) as u32)
    }
}

impl Writer for ImageWriter {
    fn name(&self) -> &str {
        &self.name
    }

    fn info(&self) -> &WriterInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut WriterInfo {
        &mut self.info
    }

    fn open(&mut self) -> Result<()> {
        if self.encoder.is_some() {
            return Err(WriterError::AlreadyOpen { path: self.name.clone() }.into());
        }
        if self.info.fps.num <= 0 || self.info.fps.den <= 0 {
            return Err(WriterError::InvalidOptions { details: format!("invalid frame rate {}", self.info.fps) }.into());
        }

        let file = File::create(&self.path)?;
        let mut encoder = GifEncoder::new(BufWriter::new(file));
        let repeat = match self.loops {
            Some(n) => Repeat::Finite(n),
            None => Repeat::Infinite,
        };
        encoder
            .set_repeat(repeat)
            .map_err(|e| WriterError::EncodingFailed { reason: e.to_string() })?;

        self.encoder = Some(encoder);
        info!("Opened GIF {} at {} fps", self.name, self.info.fps);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.encoder.is_some()
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let delay = self.frame_delay();
        let (width, height) = (self.info.width, self.info.height);
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| WriterError::WriterClosed { path: self.name.clone() })?;

        let image = if width > 0 && height > 0 && (frame.width(), frame.height()) != (width, height) {
            imageops::resize(frame.image(), width, height, FilterType::Triangle)
        } else {
            frame.image().clone()
        };

        for _ in 0..self.repeat {
            let gif_frame = image::Frame::from_parts(image.clone(), 0, 0, delay);
            encoder
                .encode_frame(gif_frame)
                .map_err(|e| WriterError::EncodingFailed { reason: e.to_string() })?;
        }
        self.info.video_length += 1;
        debug!("GIF frame {} written", frame.number);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the encoder writes the GIF trailer
        if let Some(encoder) = self.encoder.take() {
            drop(encoder);
            info!("Closed {} after {} frames", self.name, self.info.video_length);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReelError;
    use image::AnimationDecoder;
    use tempfile::tempdir;

    #[test]
    fn test_animated_gif() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("anim.gif");

        let mut writer = ImageWriter::new(&path);
        writer.set_video_options(Fraction::new(10, 1), 16, 8, Some(0), 2);
        writer.open().unwrap();
        for (n, shade) in [(1, 0u8), (2, 255u8)] {
            writer.write_frame(&Frame::new(n, 32, 16, [shade, shade, shade, 255], 0, 0)).unwrap();
        }
        writer.close().unwrap();
        assert!(!writer.is_open());

        let decoder = image::codecs::gif::GifDecoder::new(File::open(&path).unwrap()).unwrap();
        let frames = decoder.into_frames().collect_frames().unwrap();
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0].buffer().dimensions(), (16, 8));
        assert_eq!(frames[0].delay().numer_denom_ms(), (100, 1));
    }

    #[test]
    fn test_closed_writer() {
        let dir = tempdir().unwrap();
        let mut writer = ImageWriter::new(dir.path().join("x.gif"));
        let frame = Frame::new(1, 4, 4, [0, 0, 0, 255], 0, 0);
        assert!(matches!(writer.write_frame(&frame), Err(ReelError::Writer(WriterError::WriterClosed { .. }))));
    }
}
