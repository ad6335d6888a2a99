use crate::{
    core::{Frame, Keyframe},
    effects::{constrain, par_rows, Effect, EffectInfo, Placement},
    error::Result,
};

const WEIGHT_R: f64 = 0.299;
const WEIGHT_G: f64 = 0.587;
const WEIGHT_B: f64 = 0.114;

/// Color saturation: 0 is grayscale, 1 unchanged, up to 4 oversaturated
pub struct Saturation {
    info: EffectInfo,
    placement: Placement,
    pub saturation: Keyframe,
}

impl Saturation {
    pub fn new(saturation: Keyframe) -> Self {
        Self {
            info: EffectInfo::video("Saturation", "Color Saturation", "Adjust the color saturation."),
            placement: Placement::default(),
            saturation,
        }
    }
}

impl Default for Saturation {
    fn default() -> Self {
        Self::new(Keyframe::new(1.0))
    }
}

impl Effect for Saturation {
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
        let saturation = self.saturation.get_value(frame_number);

        par_rows(frame.image_mut(), |_, row| {
            for px in row.chunks_exact_mut(4) {
                let (r, g, b) = (px[0] as f64, px[1] as f64, px[2] as f64);
                // Perceived brightness
                let p = (r * r * WEIGHT_R + g * g * WEIGHT_G + b * b * WEIGHT_B).sqrt();
                px[0] = constrain(p + (r - p) * saturation);
                px[1] = constrain(p + (g - p) * saturation);
                px[2] = constrain(p + (b - p) * saturation);
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_saturation_is_gray() {
        let mut effect = Saturation::new(Keyframe::new(0.0));
        let mut frame = Frame::new(1, 2, 1, [200, 40, 90, 255], 0, 0);
        effect.apply(&mut frame, 1).unwrap();
        let [r, g, b, a] = frame.get_pixel(0, 0);
        assert_eq!(r, g);
        assert_eq!(g, b);
        assert_eq!(a, 255);
    }

    #[test]
    fn test_unit_saturation_is_identity() {
        let mut effect = Saturation::default();
        let mut frame = Frame::new(1, 1, 1, [200, 40, 90, 255], 0, 0);
        effect.apply(&mut frame, 1).unwrap();
        assert_eq!(frame.get_pixel(0, 0), [200, 40, 90, 255]);
    }
}
