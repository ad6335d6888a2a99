use std::path::PathBuf;

use image::imageops::{self, FilterType};
use tracing::{debug, info};

use crate::{
    core::Frame,
    error::{Result, WriterError},
    writers::{Writer, WriterInfo},
};

/// Substitute a frame number into a file pattern.
///
/// `{n}` is replaced by the plain number; `%d` / `%04d` follow printf
/// zero padding. A pattern with neither gets `_{n}` before its extension.
pub fn format_path(pattern: &str, number: i64) -> String {
    if pattern.contains("{n}") {
        return pattern.replace("{n}", &number.to_string());
    }

    if let Some(start) = pattern.find('%') {
        let rest = &pattern[start + 1..];
        if let Some(d) = rest.find('d') {
            let spec = &rest[..d];
            if spec.chars().all(|c| c.is_ascii_digit()) {
                let width: usize = spec.trim_start_matches('0').parse().unwrap_or(0);
                let formatted = format!("{:0width$}", number, width = width);
                return format!("{}{}{}", &pattern[..start], formatted, &rest[d + 1..]);
            }
        }
    }

    match pattern.rfind('.') {
        Some(dot) => format!("{}_{}{}", &pattern[..dot], number, &pattern[dot..]),
        None => format!("{}_{}", pattern, number),
    }
}

/// Writes each frame as its own image file
pub struct ImageSequenceWriter {
    pattern: String,
    info: WriterInfo,
    next_number: i64,
    is_open: bool,
    written: Vec<PathBuf>,
}

impl ImageSequenceWriter {
    pub fn new(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            info: WriterInfo {
                has_video: true,
                vcodec: "image".to_string(),
                ..Default::default()
            },
            next_number: 1,
            is_open: false,
            written: Vec::new(),
        }
    }

    /// Force every image to this size; 0x0 keeps the frame's own size
    pub fn set_size(&mut self, width: u32, height: u32) {
        self.info.width = width;
        self.info.height = height;
        self.info.update_display_ratio();
    }

    /// Number substituted for the next written frame
    pub fn set_start_number(&mut self, number: i64) {
        self.next_number = number;
    }

    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl Writer for ImageSequenceWriter {
    fn name(&self) -> &str {
        &self.pattern
    }

    fn info(&self) -> &WriterInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut WriterInfo {
        &mut self.info
    }

    fn open(&mut self) -> Result<()> {
        if self.is_open {
            return Err(WriterError::AlreadyOpen { path: self.pattern.clone() }.into());
        }
        if let Some(parent) = PathBuf::from(format_path(&self.pattern, self.next_number)).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        self.is_open = true;
        info!("Writing image sequence {}", self.pattern);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.is_open
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if !self.is_open {
            return Err(WriterError::WriterClosed { path: self.pattern.clone() }.into());
        }

        let path = PathBuf::from(format_path(&self.pattern, self.next_number));
        let (width, height) = (self.info.width, self.info.height);
        if width > 0 && height > 0 && (frame.width(), frame.height()) != (width, height) {
            imageops::resize(frame.image(), width, height, FilterType::Triangle).save(&path)?;
        } else {
            frame.save(&path, 1.0)?;
        }

        debug!("Saved frame {} to {}", frame.number, path.display());
        self.written.push(path);
        self.next_number += 1;
        self.info.video_length += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.is_open {
            info!("Wrote {} images for {}", self.written.len(), self.pattern);
        }
        self.is_open = false;
        Ok(())
    }
}
