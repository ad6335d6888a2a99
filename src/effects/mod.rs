//! Per-frame image effects and the placement data shared with clips

use std::io::{self, Write};

use image::RgbaImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    core::{Fraction, Frame},
    error::Result,
};

pub mod brightness;
pub mod mask;
pub mod negate;
pub mod pixelate;
pub mod registry;
pub mod saturation;

pub use brightness::Brightness;
pub use mask::Mask;
pub use negate::Negate;
pub use pixelate::Pixelate;
pub use registry::EffectRegistry;
pub use saturation::Saturation;

/// Descriptive metadata of an effect type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectInfo {
    /// Type name used by [`EffectRegistry`]
    pub class_name: String,
    pub name: String,
    pub description: String,
    pub has_video: bool,
    pub has_audio: bool,
}

impl EffectInfo {
    pub fn video(class_name: &str, name: &str, description: &str) -> Self {
        Self {
            class_name: class_name.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            has_video: true,
            has_audio: false,
        }
    }
}

/// Where something sits on a timeline.
///
/// `position` is the timeline time (seconds) of the first frame. `start`
/// and `end` trim the source, also in seconds.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Placement {
    pub id: String,
    pub position: f64,
    pub layer: i32,
    pub start: f64,
    pub end: f64,
    pub order: i32,
}

impl Placement {
    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }

    /// First and last timeline frame covered (1-based, inclusive)
    pub fn frame_range(&self, fps: Fraction) -> (i64, i64) {
        let fps = fps.to_f64();
        let first = (self.position * fps).round() as i64 + 1;
        let frames = (self.duration() * fps).round() as i64;
        (first, first + frames - 1)
    }

    pub fn covers(&self, frame_number: i64, fps: Fraction) -> bool {
        let (first, last) = self.frame_range(fps);
        frame_number >= first && frame_number <= last
    }
}

/// An image (or audio) filter applied to frames in place
pub trait Effect: Send {
    fn info(&self) -> &EffectInfo;

    fn placement(&self) -> &Placement;

    fn placement_mut(&mut self) -> &mut Placement;

    /// Modify `frame`; keyframed parameters are sampled at `frame_number`
    fn apply(&mut self, frame: &mut Frame, frame_number: i64) -> Result<()>;

    fn display_info(&self, out: &mut dyn Write) -> io::Result<()> {
        let info = self.info();
        writeln!(out, "----------------------------")?;
        writeln!(out, "----- Effect Information -----")?;
        writeln!(out, "----------------------------")?;
        writeln!(out, "--> Name: {}", info.name)?;
        writeln!(out, "--> Description: {}", info.description)?;
        writeln!(out, "--> Has Video: {}", info.has_video)?;
        writeln!(out, "--> Has Audio: {}", info.has_audio)?;
        writeln!(out, "----------------------------")
    }
}

/// Round and clamp a channel value into 0..=255
pub(crate) fn constrain(value: f64) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// Run `f` over every pixel row in parallel. Rows are RGBA bytes.
pub(crate) fn par_rows<F>(image: &mut RgbaImage, f: F)
where
    F: Fn(usize, &mut [u8]) + Sync + Send,
{
    let stride = image.width() as usize * 4;
    if stride == 0 {
        return;
    }
    image.par_chunks_mut(stride).enumerate().for_each(|(y, row)| f(y, row));
}
