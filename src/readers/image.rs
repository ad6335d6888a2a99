use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::ImageFormat;
use tracing::info;

use crate::{
    core::{Fraction, Frame},
    error::{ReaderError, Result},
    readers::{Reader, ReaderInfo},
};

/// True for files decoded in-process rather than through ffmpeg
pub fn is_still_image<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref()
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg"))
        .unwrap_or(false)
}

/// A still image served as an endless video stream
pub struct ImageReader {
    path: PathBuf,
    name: String,
    info: ReaderInfo,
    frame: Option<Arc<Frame>>,
}

impl ImageReader {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            name: path.display().to_string(),
            path,
            info: ReaderInfo::default(),
            frame: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Reader for ImageReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn info(&self) -> &ReaderInfo {
        &self.info
    }

    fn open(&mut self) -> Result<()> {
        if self.frame.is_some() {
            return Ok(());
        }

        let source = image::open(&self.path)
            .map_err(|_| ReaderError::InvalidFile { path: self.name.clone() })?
            .to_rgba8();

        let fps = Fraction::new(30, 1);
        self.info = ReaderInfo {
            has_video: true,
            has_audio: false,
            has_single_image: true,
            file_size: std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0),
            vcodec: ImageFormat::from_path(&self.path)
                .map(|f| format!("{:?}", f).to_lowercase())
                .unwrap_or_else(|_| "image".to_string()),
            pixel_format: "rgba".to_string(),
            width: source.width(),
            height: source.height(),
            duration: 60.0 * 60.0 * 24.0,
            fps,
            video_timebase: fps.reciprocal(),
            ..Default::default()
        };
        self.info.update_video_length();
        self.info.update_display_ratio();

        info!("Opened image {} ({}x{})", self.name, self.info.width, self.info.height);
        self.frame = Some(Arc::new(Frame::from_image(1, source)));
        Ok(())
    }

    fn close(&mut self) {
        self.frame = None;
    }

    fn is_open(&self) -> bool {
        self.frame.is_some()
    }

    fn get_frame(&mut self, _number: i64) -> Result<Arc<Frame>> {
        self.frame
            .clone()
            .ok_or_else(|| ReaderError::ReaderClosed { path: self.name.clone() }.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use tempfile::tempdir;

    #[test]
    fn test_still_image_detection() {
        assert!(is_still_image("a/b/photo.JPG"));
        assert!(is_still_image("mask.png"));
        assert!(!is_still_image("movie.mp4"));
        assert!(!is_still_image("noext"));
    }

    #[test]
    fn test_open_and_repeat() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("still.png");
        RgbaImage::from_pixel(6, 4, Rgba([1, 2, 3, 255])).save(&path).unwrap();

        let mut reader = ImageReader::new(&path);
        assert!(reader.get_frame(1).is_err());
        reader.open().unwrap();

        let info = reader.info();
        assert!(info.has_single_image);
        assert_eq!(info.video_length, 60 * 60 * 24 * 30);
        assert_eq!(info.display_ratio, Fraction::new(3, 2));
        assert_eq!(info.vcodec, "png");

        let a = reader.get_frame(1).unwrap();
        let b = reader.get_frame(5000).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.get_pixel(5, 3), [1, 2, 3, 255]);
    }

    #[test]
    fn test_missing_file() {
        let mut reader = ImageReader::new("/nope/missing.png");
        assert!(matches!(
            reader.open(),
            Err(crate::error::ReelError::Reader(ReaderError::InvalidFile { .. }))
        ));
    }
}
