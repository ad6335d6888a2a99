use crate::{
    core::Frame,
    effects::{par_rows, Effect, EffectInfo, Placement},
    error::Result,
};

/// Inverts the color channels, leaving alpha alone
pub struct Negate {
    info: EffectInfo,
    placement: Placement,
}

impl Negate {
    pub fn new() -> Self {
        Self {
            info: EffectInfo::video("Negate", "Negative", "Negates the colors, producing a negative of the image."),
            placement: Placement::default(),
        }
    }
}

impl Default for Negate {
    fn default() -> Self {
        Self::new()
    }
}

impl Effect for Negate {
    fn info(&self) -> &EffectInfo {
        &self.info
    }

    fn placement(&self) -> &Placement {
        &self.placement
    }

    fn placement_mut(&mut self) -> &mut Placement {
        &mut self.placement
    }

    fn apply(&mut self, frame: &mut Frame, _frame_number: i64) -> Result<()> {
        par_rows(frame.image_mut(), |_, row| {
            for px in row.chunks_exact_mut(4) {
                px[0] = 255 - px[0];
                px[1] = 255 - px[1];
                px[2] = 255 - px[2];
            }
        });
        Ok(())
    }
}
