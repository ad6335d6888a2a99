use std::sync::Arc;

use image::{
    imageops::{self, FilterType},
    RgbaImage,
};
use tracing::{debug, info};

use crate::{
    cache::FrameCache,
    config::{CacheConfig, Config},
    core::{ChannelLayout, Color, Fraction, Frame, ScaleType, VolumeMixType},
    effects::{constrain, par_rows, Effect},
    error::{ReaderError, Result, TimelineError},
    readers::{map_to_fps, Reader, ReaderInfo},
    timeline::Clip,
};

/// Gain applied to each of several overlapping clips with [`VolumeMixType::Reduce`]
const REDUCE_GAIN: f32 = 0.77;

/// Size a `width x height` source takes on a `canvas_w x canvas_h` canvas
fn scaled_size(width: u32, height: u32, canvas_w: u32, canvas_h: u32, scale: ScaleType) -> (f64, f64) {
    let (w, h) = (width as f64, height as f64);
    let (cw, ch) = (canvas_w as f64, canvas_h as f64);
    if w <= 0.0 || h <= 0.0 {
        return (0.0, 0.0);
    }
    match scale {
        ScaleType::Fit => {
            let ratio = (cw / w).min(ch / h);
            (w * ratio, h * ratio)
        }
        ScaleType::Crop => {
            let ratio = (cw / w).max(ch / h);
            (w * ratio, h * ratio)
        }
        ScaleType::Stretch => (cw, ch),
        ScaleType::None => (w, h),
    }
}

/// Multiply every alpha value by `alpha`
fn fade(image: &mut RgbaImage, alpha: f64) {
    par_rows(image, |_, row| {
        for px in row.chunks_exact_mut(4) {
            px[3] = constrain(px[3] as f64 * alpha);
        }
    });
}

/// Layers clips over a background color and mixes their audio.
///
/// Clips are drawn in (layer, position) order, so higher layers end up on
/// top. Timeline effects run on the clips of their own layer.
pub struct Timeline {
    info: ReaderInfo,
    clips: Vec<Clip>,
    effects: Vec<Box<dyn Effect>>,
    color: Color,
    /// Wrap clips whose frame rate differs from the timeline in a [`FrameMapper`](crate::readers::FrameMapper)
    pub auto_map_clips: bool,
    mix: VolumeMixType,
    high_quality_scaling: bool,
    cache: FrameCache,
    next_id: u64,
    is_open: bool,
}

impl Timeline {
    pub fn new(width: u32, height: u32, fps: Fraction, sample_rate: u32, channels: u16, layout: ChannelLayout) -> Self {
        let mut info = ReaderInfo {
            has_video: true,
            has_audio: channels > 0 && sample_rate > 0,
            vcodec: "timeline".to_string(),
            acodec: "timeline".to_string(),
            pixel_format: "rgba".to_string(),
            width,
            height,
            fps,
            video_timebase: fps.reciprocal(),
            sample_rate,
            channels,
            channel_layout: layout,
            audio_timebase: Fraction::new(1, sample_rate.max(1) as i32),
            ..Default::default()
        };
        info.update_display_ratio();

        Self {
            info,
            clips: Vec::new(),
            effects: Vec::new(),
            color: Color::default(),
            auto_map_clips: true,
            mix: VolumeMixType::default(),
            high_quality_scaling: false,
            cache: FrameCache::new(CacheConfig::default().max_bytes),
            next_id: 1,
            is_open: false,
        }
    }

    /// Take cache budget and scaling quality from the configuration
    pub fn apply_config(&mut self, config: &Config) {
        self.cache.set_max_bytes(config.cache.max_bytes);
        self.high_quality_scaling = config.render.high_quality_scaling;
    }

    pub fn set_high_quality_scaling(&mut self, enabled: bool) {
        self.high_quality_scaling = enabled;
        self.cache.clear();
    }

    /// Background
    pub fn color(&self) -> &Color {
        &self.color
    }

    pub fn set_color(&mut self, color: Color) {
        self.color = color;
        self.cache.clear();
    }

    pub fn mix(&self) -> VolumeMixType {
        self.mix
    }

    /// How overlapping clip audio is combined
    pub fn set_mix(&mut self, mix: VolumeMixType) {
        self.mix = mix;
        self.cache.clear();
    }

    fn next_id(&mut self, prefix: &str) -> String {
        let id = format!("{}-{}", prefix, self.next_id);
        self.next_id += 1;
        id
    }

    fn sort_clips(&mut self) {
        self.clips.sort_by(|a, b| {
            (a.placement.layer, a.placement.position)
                .partial_cmp(&(b.placement.layer, b.placement.position))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    fn map_clip(&self, clip: &mut Clip) {
        let info = clip.reader().info();
        if !self.auto_map_clips || !clip.reader().is_open() || info.has_single_image {
            return;
        }
        if info.fps != self.info.fps && info.fps.num > 0 {
            debug!("Mapping clip {} from {} to {} fps", clip.id(), info.fps, self.info.fps);
            let fps = self.info.fps;
            clip.wrap_reader(|reader| map_to_fps(reader, fps));
        }
    }

    fn refresh_duration(&mut self) {
        self.info.duration = self.max_time();
        self.info.update_video_length();
    }

    /// Add a clip, returning its id (one is assigned when empty)
    pub fn add_clip(&mut self, mut clip: Clip) -> Result<String> {
        if clip.placement.id.is_empty() {
            clip.placement.id = self.next_id("clip");
        }
        if self.is_open {
            clip.open()?;
        }
        self.map_clip(&mut clip);

        let id = clip.placement.id.clone();
        self.clips.push(clip);
        self.sort_clips();
        self.refresh_duration();
        self.cache.clear();
        Ok(id)
    }

    pub fn remove_clip(&mut self, id: &str) -> Result<Clip> {
        let index = self
            .clips
            .iter()
            .position(|c| c.placement.id == id)
            .ok_or_else(|| TimelineError::ClipNotFound { id: id.to_string() })?;
        let clip = self.clips.remove(index);
        self.refresh_duration();
        self.cache.clear();
        Ok(clip)
    }

    pub fn get_clip(&self, id: &str) -> Option<&Clip> {
        self.clips.iter().find(|c| c.placement.id == id)
    }

    /// Mutable access; cached frames are dropped since the clip may change.
    /// Layer and position edits take effect on the next render.
    pub fn get_clip_mut(&mut self, id: &str) -> Option<&mut Clip> {
        self.cache.clear();
        self.clips.iter_mut().find(|c| c.placement.id == id)
    }

    pub fn clips(&self) -> &[Clip] {
        &self.clips
    }

    /// Add a timeline effect, returning its id (one is assigned when empty)
    pub fn add_effect(&mut self, mut effect: Box<dyn Effect>) -> String {
        if effect.placement().id.is_empty() {
            effect.placement_mut().id = self.next_id("effect");
        }
        let id = effect.placement().id.clone();
        self.effects.push(effect);
        self.effects.sort_by(|a, b| {
            (a.placement().position, a.placement().order)
                .partial_cmp(&(b.placement().position, b.placement().order))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        self.cache.clear();
        id
    }

    pub fn remove_effect(&mut self, id: &str) -> Result<Box<dyn Effect>> {
        let index = self
            .effects
            .iter()
            .position(|e| e.placement().id == id)
            .ok_or_else(|| TimelineError::EffectNotFound { id: id.to_string() })?;
        self.cache.clear();
        Ok(self.effects.remove(index))
    }

    pub fn get_effect(&self, id: &str) -> Option<&dyn Effect> {
        self.effects.iter().find(|e| e.placement().id == id).map(|e| e.as_ref())
    }

    /// End of the last clip, in seconds
    pub fn max_time(&self) -> f64 {
        self.clips
            .iter()
            .map(|c| c.placement.position + c.placement.duration())
            .fold(0.0, f64::max)
    }

    /// Number of the last frame any clip covers
    pub fn max_frame(&self) -> i64 {
        (self.max_time() * self.info.fps.to_f64()).round() as i64
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    fn validate(&self) -> Result<()> {
        let info = &self.info;
        if info.width == 0 || info.height == 0 || info.fps.num <= 0 || info.fps.den <= 0 {
            return Err(TimelineError::InvalidParameters {
                details: format!("{}x{} @ {} fps", info.width, info.height, info.fps),
            }
            .into());
        }
        Ok(())
    }

    fn filter(&self) -> FilterType {
        if self.high_quality_scaling {
            FilterType::Lanczos3
        } else {
            FilterType::Triangle
        }
    }

    /// Scale, fade and draw one clip frame onto the canvas
    fn draw_clip(&self, canvas: &mut RgbaImage, clip: &Clip, source: &Frame, clip_frame: i64) {
        let alpha = clip.alpha.get_value(clip_frame).clamp(0.0, 1.0);
        if alpha <= 0.0 {
            return;
        }

        let (w, h) = scaled_size(source.width(), source.height(), self.info.width, self.info.height, clip.scale);
        let width = (w * clip.scale_x.get_value(clip_frame)).round();
        let height = (h * clip.scale_y.get_value(clip_frame)).round();
        if width < 1.0 || height < 1.0 {
            return;
        }
        let (width, height) = (width as u32, height as u32);

        let mut image = if (width, height) == source.image().dimensions() {
            source.image().clone()
        } else {
            imageops::resize(source.image(), width, height, self.filter())
        };
        if alpha < 1.0 {
            fade(&mut image, alpha);
        }

        let (cw, ch) = (self.info.width as f64, self.info.height as f64);
        let x = (cw - width as f64) * clip.gravity.horizontal_factor() + clip.location_x.get_value(clip_frame) * cw;
        let y = (ch - height as f64) * clip.gravity.vertical_factor() + clip.location_y.get_value(clip_frame) * ch;
        imageops::overlay(canvas, &image, x.round() as i64, y.round() as i64);
    }

    /// Frame number relative to a placement's own start
    fn local_frame(&self, first: i64, start: f64, number: i64) -> i64 {
        number - first + 1 + (start * self.info.fps.to_f64()).round() as i64
    }

    fn render(&mut self, number: i64) -> Result<Frame> {
        // Placements may have changed through get_clip_mut
        self.sort_clips();
        let fps = self.info.fps;
        let (sample_rate, channels) = (self.info.sample_rate, self.info.channels);
        let samples = Frame::samples_per_frame(number, fps, sample_rate, channels);

        let mut frame = Frame::new(number, self.info.width, self.info.height, self.color.get_rgba(number), samples, channels);
        frame.set_sample_rate(sample_rate);
        frame.set_channel_layout(self.info.channel_layout);

        let visible: Vec<usize> = (0..self.clips.len())
            .filter(|&i| self.clips[i].placement.covers(number, fps))
            .collect();
        let audible = visible
            .iter()
            .filter(|&&i| self.clips[i].reader().info().has_audio)
            .count();
        let mix_gain = match self.mix {
            VolumeMixType::None => 1.0,
            VolumeMixType::Average => 1.0 / audible.max(1) as f32,
            VolumeMixType::Reduce if audible > 1 => REDUCE_GAIN,
            VolumeMixType::Reduce => 1.0,
        };
        debug!("Timeline frame {}: {} clips", number, visible.len());

        let mut canvas = std::mem::take(frame.image_mut());
        for index in visible {
            let (first, _) = self.clips[index].placement.frame_range(fps);
            let clip_frame = self.local_frame(first, self.clips[index].placement.start, number);
            let layer = self.clips[index].placement.layer;
            let mut source = self.clips[index].get_frame(clip_frame)?;

            for effect_index in 0..self.effects.len() {
                let placement = self.effects[effect_index].placement().clone();
                if placement.layer != layer || !placement.covers(number, fps) {
                    continue;
                }
                let (effect_first, _) = placement.frame_range(fps);
                let effect_frame = self.local_frame(effect_first, placement.start, number);
                self.effects[effect_index].apply(&mut source, effect_frame)?;
            }

            let clip = &self.clips[index];
            if clip.reader().info().has_audio && source.channels() > 0 && channels > 0 {
                let gain = clip.volume.get_value(clip_frame) as f32 * mix_gain;
                let source_channels = source.channels() as usize;
                for channel in 0..channels as usize {
                    let input = source.audio_samples(channel % source_channels);
                    frame.add_audio(false, channel, 0, &input[..input.len().min(samples)], gain);
                }
            }

            if clip.reader().info().has_video {
                self.draw_clip(&mut canvas, clip, &source, clip_frame);
            }
        }
        frame.add_image(canvas);
        Ok(frame)
    }
}

impl Reader for Timeline {
    fn name(&self) -> &str {
        "timeline"
    }

    fn info(&self) -> &ReaderInfo {
        &self.info
    }

    fn open(&mut self) -> Result<()> {
        self.validate()?;
        let mut clips = std::mem::take(&mut self.clips);
        let opened = clips.iter_mut().try_for_each(|clip| {
            clip.open()?;
            self.map_clip(clip);
            Ok::<(), crate::error::ReelError>(())
        });
        self.clips = clips;
        opened?;
        self.is_open = true;
        self.refresh_duration();
        info!(
            "Opened timeline {}x{} @ {} fps with {} clips and {} effects ({:.2}s)",
            self.info.width,
            self.info.height,
            self.info.fps,
            self.clips.len(),
            self.effects.len(),
            self.info.duration
        );
        Ok(())
    }

    fn close(&mut self) {
        for clip in &mut self.clips {
            clip.close();
        }
        self.cache.clear();
        self.is_open = false;
    }

    fn is_open(&self) -> bool {
        self.is_open
    }

    fn get_frame(&mut self, number: i64) -> Result<Arc<Frame>> {
        if !self.is_open {
            return Err(ReaderError::ReaderClosed { path: "timeline".to_string() }.into());
        }
        let number = number.max(1);
        if let Some(frame) = self.cache.get(number) {
            return Ok(frame);
        }

        let frame = Arc::new(self.render(number)?);
        self.cache.add(frame.clone());
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{GravityType, Keyframe};
    use crate::effects::{Negate, Placement};
    use crate::readers::DummyReader;

    fn solid(color: [u8; 4], size: (u32, u32), fps: i32) -> Box<dyn Reader> {
        Box::new(DummyReader::new(Fraction::new(fps, 1), size.0, size.1, 0, 0, 2.0).with_color(color))
    }

    /// One second of 24 fps mono audio holding a constant level
    fn tone(level: f32) -> Box<dyn Reader> {
        let fps = Fraction::new(24, 1);
        let mut cache = FrameCache::new(0);
        for n in 1..=24 {
            let samples = Frame::samples_per_frame(n, fps, 48000, 1);
            let mut frame = Frame::new(n, 2, 2, [0, 0, 0, 0], 0, 1);
            frame.add_audio(true, 0, 0, &vec![level; samples], 1.0);
            cache.add(Arc::new(frame));
        }
        Box::new(DummyReader::new(fps, 2, 2, 48000, 1, 1.0).with_cache(cache))
    }

    fn timeline() -> Timeline {
        Timeline::new(8, 8, Fraction::new(24, 1), 48000, 1, ChannelLayout::Mono)
    }

    #[test]
    fn test_background_and_closed() {
        let mut tl = timeline();
        assert!(tl.get_frame(1).is_err());
        tl.set_color(Color::from_rgba(0, 0, 255, 255));
        tl.open().unwrap();
        let frame = tl.get_frame(1).unwrap();
        assert_eq!(frame.get_pixel(4, 4), [0, 0, 255, 255]);
        assert_eq!(frame.sample_count(), 2000);
    }

    #[test]
    fn test_color_change_rerenders() {
        let mut tl = timeline();
        tl.open().unwrap();
        assert_eq!(tl.get_frame(1).unwrap().get_pixel(0, 0), [0, 0, 0, 255]);

        tl.set_color(Color::from_rgba(0, 0, 255, 255));
        assert_eq!(tl.get_frame(1).unwrap().get_pixel(0, 0), [0, 0, 255, 255]);
        assert_eq!(tl.color().get_rgba(1), [0, 0, 255, 255]);
    }

    #[test]
    fn test_cache_is_bounded_by_default() {
        let tl = timeline();
        assert_eq!(tl.cache.max_bytes(), CacheConfig::default().max_bytes);
        assert!(tl.cache.max_bytes() > 0);
    }

    #[test]
    fn test_layer_edit_changes_draw_order() {
        let mut tl = timeline();
        let mut red = Clip::new(solid([255, 0, 0, 255], (8, 8), 24));
        red.placement.layer = 1;
        let mut green = Clip::new(solid([0, 255, 0, 255], (8, 8), 24));
        green.placement.layer = 2;
        let red_id = tl.add_clip(red).unwrap();
        tl.add_clip(green).unwrap();
        tl.open().unwrap();
        assert_eq!(tl.get_frame(1).unwrap().get_pixel(4, 4), [0, 255, 0, 255]);

        tl.get_clip_mut(&red_id).unwrap().placement.layer = 5;
        assert_eq!(tl.get_frame(1).unwrap().get_pixel(4, 4), [255, 0, 0, 255]);
        assert_eq!(tl.clips().last().map(|c| c.id()), Some(red_id.as_str()));
    }

    #[test]
    fn test_trimmed_clip_shows_later_source_frames() {
        let fps = Fraction::new(24, 1);
        let mut cache = FrameCache::new(0);
        for n in 1..=48 {
            cache.add(Arc::new(Frame::new(n, 8, 8, [n as u8 * 5, 0, 0, 255], 0, 0)));
        }
        let reader = DummyReader::new(fps, 8, 8, 0, 0, 2.0).with_cache(cache);

        let mut tl = timeline();
        let mut clip = Clip::new(Box::new(reader));
        clip.placement.position = 1.0;
        clip.placement.start = 0.5;
        tl.add_clip(clip).unwrap();
        tl.open().unwrap();

        // 1.5s of source placed at 1s: timeline frames 25..=60
        assert_eq!(tl.max_frame(), 60);
        assert_eq!(tl.get_frame(24).unwrap().get_pixel(0, 0), [0, 0, 0, 255]);
        // Frame 25 is the first clip frame, which skips the first 12 source frames
        assert_eq!(tl.get_frame(25).unwrap().get_pixel(0, 0), [13 * 5, 0, 0, 255]);
        assert_eq!(tl.get_frame(30).unwrap().get_pixel(0, 0), [18 * 5, 0, 0, 255]);
        assert_eq!(tl.get_frame(60).unwrap().get_pixel(0, 0), [48 * 5, 0, 0, 255]);
    }

    #[test]
    fn test_layers_stack_and_placement() {
        let mut tl = timeline();
        let mut bottom = Clip::new(solid([255, 0, 0, 255], (8, 8), 24));
        bottom.placement.layer = 1;
        let mut top = Clip::new(solid([0, 255, 0, 255], (2, 2), 24));
        top.placement.layer = 2;
        top.scale = ScaleType::None;
        top.gravity = GravityType::BottomRight;

        // Added in reverse to check layer ordering
        tl.add_clip(top).unwrap();
        tl.add_clip(bottom).unwrap();
        tl.open().unwrap();
        assert_eq!(tl.max_time(), 2.0);
        assert_eq!(tl.max_frame(), 48);
        assert_eq!(tl.info().video_length, 48);

        let frame = tl.get_frame(10).unwrap();
        assert_eq!(frame.get_pixel(7, 7), [0, 255, 0, 255]);
        assert_eq!(frame.get_pixel(6, 6), [0, 255, 0, 255]);
        assert_eq!(frame.get_pixel(5, 5), [255, 0, 0, 255]);
        assert_eq!(frame.get_pixel(0, 0), [255, 0, 0, 255]);

        // Past the end only the background remains
        let frame = tl.get_frame(49).unwrap();
        assert_eq!(frame.get_pixel(0, 0), [0, 0, 0, 255]);
    }

    #[test]
    fn test_position_and_alpha() {
        let mut tl = timeline();
        let mut clip = Clip::new(solid([255, 255, 255, 255], (8, 8), 24));
        clip.placement.position = 1.0;
        clip.alpha = Keyframe::new(0.5);
        tl.add_clip(clip).unwrap();
        tl.open().unwrap();

        assert_eq!(tl.get_frame(24).unwrap().get_pixel(0, 0), [0, 0, 0, 255]);
        let [r, g, b, a] = tl.get_frame(25).unwrap().get_pixel(0, 0);
        assert!((127..=129).contains(&r) && r == g && g == b);
        assert_eq!(a, 255);
    }

    #[test]
    fn test_fit_scaling_and_location() {
        let mut tl = timeline();
        let mut clip = Clip::new(solid([255, 255, 255, 255], (4, 2), 24));
        clip.gravity = GravityType::TopLeft;
        clip.location_y = Keyframe::new(0.25);
        tl.add_clip(clip).unwrap();
        tl.open().unwrap();

        // 4x2 fits as 8x4, shifted down by 2 rows
        let frame = tl.get_frame(1).unwrap();
        assert_eq!(frame.get_pixel(0, 1), [0, 0, 0, 255]);
        assert_eq!(frame.get_pixel(0, 2), [255, 255, 255, 255]);
        assert_eq!(frame.get_pixel(7, 5), [255, 255, 255, 255]);
        assert_eq!(frame.get_pixel(7, 6), [0, 0, 0, 255]);
    }

    #[test]
    fn test_effects_follow_layer_and_range() {
        let mut tl = timeline();
        let mut clip = Clip::new(solid([10, 10, 10, 255], (8, 8), 24));
        clip.placement.layer = 3;
        tl.add_clip(clip).unwrap();

        let mut negate = Negate::new();
        *negate.placement_mut() = Placement { layer: 3, position: 0.0, end: 0.5, ..Default::default() };
        let id = tl.add_effect(Box::new(negate));
        assert!(tl.get_effect(&id).is_some());
        tl.open().unwrap();

        assert_eq!(tl.get_frame(1).unwrap().get_pixel(0, 0), [245, 245, 245, 255]);
        assert_eq!(tl.get_frame(13).unwrap().get_pixel(0, 0), [10, 10, 10, 255]);

        assert!(tl.remove_effect(&id).is_ok());
        assert!(matches!(
            tl.remove_effect(&id),
            Err(crate::error::ReelError::Timeline(TimelineError::EffectNotFound { .. }))
        ));
    }

    #[test]
    fn test_audio_mixing() {
        let mut tl = timeline();
        tl.add_clip(Clip::new(tone(0.5))).unwrap();
        tl.add_clip(Clip::new(tone(0.25))).unwrap();
        tl.open().unwrap();
        let frame = tl.get_frame(1).unwrap();
        assert!((frame.audio_samples(0)[0] - 0.75).abs() < 1e-6);

        tl.set_mix(VolumeMixType::Average);
        let frame = tl.get_frame(1).unwrap();
        assert!((frame.audio_samples(0)[100] - 0.375).abs() < 1e-6);

        let id = tl.clips()[0].id().to_string();
        tl.get_clip_mut(&id).unwrap().volume = Keyframe::new(0.0);
        tl.set_mix(VolumeMixType::None);
        let frame = tl.get_frame(1).unwrap();
        assert!((frame.audio_samples(0)[0] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_reduce_mix() {
        let mut tl = timeline();
        tl.set_mix(VolumeMixType::Reduce);
        let first = tl.add_clip(Clip::new(tone(0.5))).unwrap();
        tl.add_clip(Clip::new(tone(0.25))).unwrap();
        tl.open().unwrap();

        let frame = tl.get_frame(1).unwrap();
        assert!((frame.audio_samples(0)[0] - 0.75 * REDUCE_GAIN).abs() < 1e-6);

        // A lone clip keeps its level
        tl.remove_clip(&first).unwrap();
        let frame = tl.get_frame(1).unwrap();
        assert!((frame.audio_samples(0)[0] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_clip_frame_rates_are_mapped() {
        let mut tl = timeline();
        let id = tl.add_clip(Clip::new(solid([1, 2, 3, 255], (8, 8), 30))).unwrap();
        tl.open().unwrap();
        assert_eq!(tl.get_clip(&id).unwrap().reader().info().fps, Fraction::new(24, 1));
        assert_eq!(tl.get_frame(2).unwrap().get_pixel(0, 0), [1, 2, 3, 255]);

        let removed = tl.remove_clip(&id).unwrap();
        assert_eq!(removed.id(), id);
        assert!(tl.remove_clip(&id).is_err());
    }
}
