use image::imageops::{self, FilterType};

use crate::{
    core::{Frame, Keyframe},
    effects::{Effect, EffectInfo, Placement},
    error::Result,
};

/// Blocky low resolution look inside an optional margin box.
///
/// `pixelization` of 0 leaves the image alone; values towards 1 make the
/// blocks larger. Margins are fractions of the frame size.
pub struct Pixelate {
    info: EffectInfo,
    placement: Placement,
    pub pixelization: Keyframe,
    pub left: Keyframe,
    pub top: Keyframe,
    pub right: Keyframe,
    pub bottom: Keyframe,
}

impl Pixelate {
    pub fn new(pixelization: Keyframe, left: Keyframe, top: Keyframe, right: Keyframe, bottom: Keyframe) -> Self {
        Self {
            info: EffectInfo::video(
                "Pixelate",
                "Pixelate",
                "Pixelate (increase or decrease) the number of visible pixels.",
            ),
            placement: Placement::default(),
            pixelization,
            left,
            top,
            right,
            bottom,
        }
    }
}

impl Default for Pixelate {
    fn default() -> Self {
        Self::new(
            Keyframe::new(0.7),
            Keyframe::new(0.0),
            Keyframe::new(0.0),
            Keyframe::new(0.0),
            Keyframe::new(0.0),
        )
    }
}

impl Effect for Pixelate {
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
        let scale = 1.0 - self.pixelization.get_value(frame_number).abs().min(1.0);
        let (width, height) = (frame.width(), frame.height());
        if scale <= 0.0 || width == 0 || height == 0 {
            return Ok(());
        }

        let small_width = (width as f64 * scale).max(2.0).round() as u32;
        let small_height = ((height as f64 * small_width as f64 / width as f64).round() as u32).max(1);
        let small = imageops::resize(frame.image(), small_width, small_height, FilterType::Triangle);
        let blocks = imageops::resize(&small, width, height, FilterType::Nearest);

        let top = (self.top.get_value(frame_number) * height as f64) as u32;
        let bottom = (self.bottom.get_value(frame_number) * height as f64) as u32;
        let left = (self.left.get_value(frame_number) * width as f64) as u32;
        let right = (self.right.get_value(frame_number) * width as f64) as u32;

        let x_end = width.saturating_sub(right);
        let y_end = height.saturating_sub(bottom);
        let image = frame.image_mut();
        for y in top.min(height)..y_end {
            for x in left.min(width)..x_end {
                image.put_pixel(x, y, *blocks.get_pixel(x, y));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn checkerboard() -> Frame {
        let mut frame = Frame::new(1, 8, 8, [0, 0, 0, 255], 0, 0);
        for y in 0..8 {
            for x in 0..8 {
                if (x + y) % 2 == 0 {
                    frame.set_pixel(x, y, [255, 255, 255, 255]);
                }
            }
        }
        frame
    }

    #[test]
    fn test_zero_pixelization_is_identity() {
        let mut effect = Pixelate::new(
            Keyframe::new(0.0),
            Keyframe::new(0.0),
            Keyframe::new(0.0),
            Keyframe::new(0.0),
            Keyframe::new(0.0),
        );
        let mut frame = checkerboard();
        let before = frame.image().clone();
        effect.apply(&mut frame, 1).unwrap();
        assert_eq!(frame.image(), &before);
    }

    #[test]
    fn test_blocks_and_margins() {
        let mut effect = Pixelate::new(
            Keyframe::new(0.75),
            Keyframe::new(0.5),
            Keyframe::new(0.0),
            Keyframe::new(0.0),
            Keyframe::new(0.0),
        );
        let mut frame = checkerboard();
        effect.apply(&mut frame, 1).unwrap();

        // Left half is untouched
        assert_eq!(frame.get_pixel(0, 0), [255, 255, 255, 255]);
        assert_eq!(frame.get_pixel(1, 0), [0, 0, 0, 255]);
        // Right half is made of 4x4 blocks
        let block = *frame.image().get_pixel(4, 0);
        assert_eq!(*frame.image().get_pixel(5, 1), block);
        assert_ne!(block, Rgba([255, 255, 255, 255]));
    }
}
