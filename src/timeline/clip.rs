use std::path::Path;

use tracing::debug;

use crate::{
    config::FfmpegConfig,
    core::{Frame, GravityType, Keyframe, ScaleType},
    effects::{Effect, Placement},
    error::{Result, TimelineError},
    readers::{self, FfmpegReader, ImageReader, Reader},
};

/// A reader placed on a timeline with animatable transform, opacity and
/// volume curves
pub struct Clip {
    pub placement: Placement,
    reader: Box<dyn Reader>,
    pub gravity: GravityType,
    pub scale: ScaleType,
    /// Opacity, 0..1
    pub alpha: Keyframe,
    /// Horizontal scale factor on top of `scale`
    pub scale_x: Keyframe,
    pub scale_y: Keyframe,
    /// Offset from the gravity anchor as a fraction of the canvas width
    pub location_x: Keyframe,
    /// Offset from the gravity anchor as a fraction of the canvas height
    pub location_y: Keyframe,
    pub volume: Keyframe,
    /// Maps clip frames to source frames (speed ramps, reverse); ignored
    /// unless it has more than one point
    pub time: Keyframe,
    effects: Vec<Box<dyn Effect>>,
}

impl Clip {
    pub fn new(reader: Box<dyn Reader>) -> Self {
        let end = if reader.is_open() { reader.info().duration } else { 0.0 };
        Self {
            placement: Placement { end, ..Default::default() },
            reader,
            gravity: GravityType::Center,
            scale: ScaleType::Fit,
            alpha: Keyframe::new(1.0),
            scale_x: Keyframe::new(1.0),
            scale_y: Keyframe::new(1.0),
            location_x: Keyframe::new(0.0),
            location_y: Keyframe::new(0.0),
            volume: Keyframe::new(1.0),
            time: Keyframe::default(),
            effects: Vec::new(),
        }
    }

    /// Clip over a file, picking the reader from the extension. The reader
    /// opens with the clip.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        Self::from_path_with(path, &FfmpegConfig::from_env())
    }

    pub fn from_path_with<P: AsRef<Path>>(path: P, ffmpeg: &FfmpegConfig) -> Self {
        let path = path.as_ref();
        let reader: Box<dyn Reader> = if readers::image::is_still_image(path) {
            Box::new(ImageReader::new(path))
        } else {
            Box::new(FfmpegReader::with_config(path, ffmpeg.clone()))
        };
        Self::new(reader)
    }

    pub fn id(&self) -> &str {
        &self.placement.id
    }

    pub fn reader(&self) -> &dyn Reader {
        self.reader.as_ref()
    }

    pub fn reader_mut(&mut self) -> &mut dyn Reader {
        self.reader.as_mut()
    }

    /// Replace the reader with `wrap(old_reader)`
    pub fn wrap_reader<F>(&mut self, wrap: F)
    where
        F: FnOnce(Box<dyn Reader>) -> Box<dyn Reader>,
    {
        let placeholder: Box<dyn Reader> = Box::new(readers::DummyReader::new(
            self.reader.info().fps,
            1,
            1,
            0,
            0,
            0.0,
        ));
        let reader = std::mem::replace(&mut self.reader, placeholder);
        self.reader = wrap(reader);
    }

    pub fn open(&mut self) -> Result<()> {
        self.reader.open()?;
        if self.placement.end <= 0.0 {
            self.placement.end = self.reader.info().duration;
        }
        debug!(
            "Clip {} open: {} ({:.2}s..{:.2}s at {:.2}s, layer {})",
            self.placement.id,
            self.reader.name(),
            self.placement.start,
            self.placement.end,
            self.placement.position,
            self.placement.layer
        );
        Ok(())
    }

    pub fn close(&mut self) {
        self.reader.close();
    }

    /// Attach an effect; effects run in ascending `order`
    pub fn add_effect(&mut self, effect: Box<dyn Effect>) {
        self.effects.push(effect);
        self.effects.sort_by_key(|e| e.placement().order);
    }

    pub fn remove_effect(&mut self, id: &str) -> Result<Box<dyn Effect>> {
        let index = self
            .effects
            .iter()
            .position(|e| e.placement().id == id)
            .ok_or_else(|| TimelineError::EffectNotFound { id: id.to_string() })?;
        Ok(self.effects.remove(index))
    }

    pub fn effects(&self) -> &[Box<dyn Effect>] {
        &self.effects
    }

    /// Source frame shown at clip frame `number`
    pub fn source_frame_number(&self, number: i64) -> i64 {
        let number = if self.time.get_count() > 1 { self.time.get_long(number) } else { number };
        number.max(1)
    }

    /// Source frame with the clip effects applied, renumbered to `number`
    pub fn get_frame(&mut self, number: i64) -> Result<Frame> {
        let source = self.reader.get_frame(self.source_frame_number(number))?;
        let mut frame = (*source).clone();
        frame.number = number;

        for effect in &mut self.effects {
            effect.apply(&mut frame, number)?;
        }
        Ok(frame)
    }
}
