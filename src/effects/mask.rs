use image::{
    imageops::{self, FilterType},
    RgbaImage,
};
use tracing::debug;

use crate::{
    core::{Frame, Keyframe},
    effects::{brightness::contrast_factor, constrain, par_rows, Effect, EffectInfo, Placement},
    error::Result,
    readers::Reader,
};

/// Luminance weights of `(11 R + 16 G + 5 B) / 32`
fn gray(r: u8, g: u8, b: u8) -> i32 {
    (r as i32 * 11 + g as i32 * 16 + b as i32 * 5) / 32
}

/// Alpha wipe driven by a grayscale image.
///
/// Dark mask pixels keep the frame, light ones cut it away. Animating
/// `brightness` from 1 to -1 sweeps the wipe through every gray level.
pub struct Mask {
    info: EffectInfo,
    placement: Placement,
    reader: Option<Box<dyn Reader>>,
    pub brightness: Keyframe,
    pub contrast: Keyframe,
    /// Paint the adjusted mask itself instead of cutting the frame
    pub replace_image: bool,
    mask: Option<RgbaImage>,
    needs_refresh: bool,
}

impl Mask {
    pub fn new(reader: Box<dyn Reader>, brightness: Keyframe, contrast: Keyframe) -> Self {
        let mut mask = Self::default();
        mask.reader = Some(reader);
        mask.brightness = brightness;
        mask.contrast = contrast;
        mask
    }

    pub fn reader(&self) -> Option<&dyn Reader> {
        self.reader.as_deref()
    }

    /// Swap the mask source; the next frame reloads it
    pub fn set_reader(&mut self, reader: Box<dyn Reader>) {
        self.reader = Some(reader);
        self.needs_refresh = true;
    }

    /// Fetch (and resize) the mask for this frame unless the cached one still applies
    fn load_mask(&mut self, frame_number: i64, width: u32, height: u32) -> Result<bool> {
        let reader = match self.reader.as_mut() {
            Some(reader) => reader,
            None => return Ok(false),
        };
        if !reader.is_open() {
            reader.open()?;
        }

        let stale = match &self.mask {
            Some(mask) => {
                self.needs_refresh || !reader.info().has_single_image || mask.dimensions() != (width, height)
            }
            None => true,
        };
        if stale {
            let source = reader.get_frame(frame_number)?;
            let image = if source.image().dimensions() == (width, height) {
                source.image().clone()
            } else {
                debug!("Resizing mask {} to {}x{}", reader.name(), width, height);
                imageops::resize(source.image(), width, height, FilterType::Triangle)
            };
            self.mask = Some(image);
            self.needs_refresh = false;
        }
        Ok(true)
    }
}

impl Default for Mask {
    fn default() -> Self {
        Self {
            info: EffectInfo::video(
                "Mask",
                "Alpha Mask / Wipe Transition",
                "Uses a grayscale mask image to gradually wipe / transition between 2 images.",
            ),
            placement: Placement::default(),
            reader: None,
            brightness: Keyframe::new(0.0),
            contrast: Keyframe::new(0.0),
            replace_image: false,
            mask: None,
            needs_refresh: true,
        }
    }
}

impl Effect for Mask {
    fn info(&self) -> &EffectInfo {
        &self.info
    }

    fn placement(&self) -> &Placement {
        &self.placement
    }

    fn placement_mut(&mut self) -> &mut Placement {
        &mut self.placement
    }

    fn apply(&mut self, frame: &mut Frame, frame_number: i64) -> Result<()> {
        if !self.load_mask(frame_number, frame.width(), frame.height())? {
            return Ok(());
        }
        let mask = match &self.mask {
            Some(mask) => mask,
            None => return Ok(()),
        };

        let factor = contrast_factor(self.contrast.get_value(frame_number));
        let brightness = self.brightness.get_value(frame_number) * 255.0;
        let replace = self.replace_image;
        let stride = mask.width() as usize * 4;

        par_rows(frame.image_mut(), |y, row| {
            let mask_row = &mask.as_raw()[y * stride..(y + 1) * stride];
            for (px, m) in row.chunks_exact_mut(4).zip(mask_row.chunks_exact(4)) {
                let level = constrain(factor * (gray(m[0], m[1], m[2]) - 128) as f64 + 128.0) as f64;
                let level = constrain(level + brightness);

                if replace {
                    px.copy_from_slice(&[level; 4]);
                } else {
                    let keep = (m[3] as i32 - level as i32).clamp(0, 255) as f64 / 255.0;
                    px[3] = constrain(px[3] as f64 * keep);
                }
            }
        });
        Ok(())
    }
}
