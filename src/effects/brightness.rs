use crate::{
    core::{Frame, Keyframe},
    effects::{constrain, par_rows, Effect, EffectInfo, Placement},
    error::Result,
};

/// Brightness and contrast adjustment.
///
/// `brightness` runs from -1.0 (black) to 1.0 (white); `contrast` is the
/// usual 0..100 style value where 0 leaves the image alone.
pub struct Brightness {
    info: EffectInfo,
    placement: Placement,
    pub brightness: Keyframe,
    pub contrast: Keyframe,
}

impl Brightness {
    pub fn new(brightness: Keyframe, contrast: Keyframe) -> Self {
        Self {
            info: EffectInfo::video(
                "Brightness",
                "Brightness & Contrast",
                "Adjust the brightness and contrast of the frame's image.",
            ),
            placement: Placement::default(),
            brightness,
            contrast,
        }
    }
}

impl Default for Brightness {
    fn default() -> Self {
        Self::new(Keyframe::new(0.0), Keyframe::new(3.0))
    }
}

/// Slope of the classic contrast curve around mid gray
pub(crate) fn contrast_factor(contrast: f64) -> f64 {
    (259.0 * (contrast + 255.0)) / (255.0 * (259.0 - contrast))
}

impl Effect for Brightness {
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
        let brightness = self.brightness.get_value(frame_number) * 255.0;
        let factor = contrast_factor(self.contrast.get_value(frame_number));

        par_rows(frame.image_mut(), |_, row| {
            for px in row.chunks_exact_mut(4) {
                for c in &mut px[..3] {
                    let contrasted = constrain(factor * (*c as f64 - 128.0) + 128.0) as f64;
                    *c = constrain(contrasted + brightness);
                }
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_at_zero() {
        let mut effect = Brightness::new(Keyframe::new(0.0), Keyframe::new(0.0));
        let mut frame = Frame::new(1, 2, 2, [10, 128, 200, 77], 0, 0);
        effect.apply(&mut frame, 1).unwrap();
        assert_eq!(frame.get_pixel(1, 1), [10, 128, 200, 77]);
    }

    #[test]
    fn test_keyframed_brightness() {
        let mut brightness = Keyframe::default();
        brightness.add_point(1.0, -1.0);
        brightness.add_point(10.0, 1.0);
        let mut effect = Brightness::new(brightness, Keyframe::new(0.0));

        let mut dark = Frame::new(1, 1, 1, [100, 100, 100, 255], 0, 0);
        effect.apply(&mut dark, 1).unwrap();
        assert_eq!(dark.get_pixel(0, 0), [0, 0, 0, 255]);

        let mut bright = Frame::new(10, 1, 1, [100, 100, 100, 255], 0, 0);
        effect.apply(&mut bright, 10).unwrap();
        assert_eq!(bright.get_pixel(0, 0), [255, 255, 255, 255]);
    }

    #[test]
    fn test_contrast_spreads_values() {
        let mut effect = Brightness::new(Keyframe::new(0.0), Keyframe::new(50.0));
        let mut frame = Frame::new(1, 1, 1, [100, 128, 160, 255], 0, 0);
        effect.apply(&mut frame, 1).unwrap();
        let px = frame.get_pixel(0, 0);
        assert!(px[0] < 100);
        assert_eq!(px[1], 128);
        assert!(px[2] > 160);
    }
}
