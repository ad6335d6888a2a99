use std::fs::File;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};

use image::imageops::{self, FilterType};
use tracing::{debug, info, warn};

use crate::{
    config::FfmpegConfig,
    core::{ChannelLayout, Fraction, Frame},
    error::{Result, WriterError},
    writers::{StreamType, Writer, WriterInfo},
};

/// Distinguishes scratch directories of writers living in the same process
static NEXT_SCRATCH_ID: AtomicU64 = AtomicU64::new(0);

type WavWriter = hound::WavWriter<BufWriter<File>>;

/// Encoders that keep the alpha channel; everything else gets yuv420p
fn output_pixel_format(codec: &str) -> &'static str {
    match codec {
        "png" | "qtrle" | "rawvideo" | "ffv1" => "rgba",
        _ => "yuv420p",
    }
}

/// Whether `codec` appears in the listing printed by `ffmpeg -encoders`
fn encoder_listed(listing: &str, codec: &str) -> bool {
    listing
        .lines()
        .skip_while(|line| !line.trim_start().starts_with("------"))
        .skip(1)
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|name| name == codec)
}

fn option_args(options: &[(String, String)]) -> Vec<String> {
    options
        .iter()
        .flat_map(|(name, value)| [format!("-{}", name), value.clone()])
        .collect()
}

/// Encodes frames into any container ffmpeg can write.
///
/// Video frames are piped as raw RGBA into an `ffmpeg` child. Audio is
/// collected in a scratch float WAV and muxed in on [`Writer::close`].
pub struct FfmpegWriter {
    path: PathBuf,
    name: String,
    config: FfmpegConfig,
    info: WriterInfo,
    video_options: Vec<(String, String)>,
    audio_options: Vec<(String, String)>,
    scratch_dir: Option<PathBuf>,
    encoder: Option<Child>,
    stdin: Option<BufWriter<ChildStdin>>,
    wav: Option<WavWriter>,
    frames_written: i64,
    is_open: bool,
}

impl FfmpegWriter {
    /// Writer using the ffmpeg binary from the environment
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self::with_config(path, FfmpegConfig::from_env())
    }

    pub fn with_config<P: AsRef<Path>>(path: P, config: FfmpegConfig) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            name: path.display().to_string(),
            path,
            config,
            info: WriterInfo::default(),
            video_options: Vec::new(),
            audio_options: Vec::new(),
            scratch_dir: None,
            encoder: None,
            stdin: None,
            wav: None,
            frames_written: 0,
            is_open: false,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn set_video_options(
        &mut self,
        has_video: bool,
        codec: &str,
        fps: Fraction,
        width: u32,
        height: u32,
        pixel_ratio: Fraction,
        interlaced: bool,
        top_field_first: bool,
        bit_rate: u64,
    ) {
        let info = &mut self.info;
        info.has_video = has_video;
        info.vcodec = codec.to_string();
        info.fps = fps;
        info.width = width;
        info.height = height;
        info.pixel_ratio = pixel_ratio;
        info.interlaced_frame = interlaced;
        info.top_field_first = top_field_first;
        info.video_bit_rate = bit_rate;
        info.update_display_ratio();
        debug!("{}: video {} {}x{} @ {} fps", self.name, codec, width, height, fps);
    }

    pub fn set_audio_options(
        &mut self,
        has_audio: bool,
        codec: &str,
        sample_rate: u32,
        channels: u16,
        layout: ChannelLayout,
        bit_rate: u64,
    ) {
        let info = &mut self.info;
        info.has_audio = has_audio;
        info.acodec = codec.to_string();
        info.sample_rate = sample_rate;
        info.channels = channels;
        info.channel_layout = layout;
        info.audio_bit_rate = bit_rate;
        debug!("{}: audio {} {} Hz x{}", self.name, codec, sample_rate, channels);
    }

    /// Pass an extra encoder flag, e.g. `(Video, "crf", "10")` becomes `-crf 10`.
    /// Setting the same name twice keeps the last value.
    pub fn set_option(&mut self, stream: StreamType, name: &str, value: &str) -> Result<()> {
        if self.is_open {
            return Err(WriterError::AlreadyOpen { path: self.name.clone() }.into());
        }
        let name = name.trim_start_matches('-');
        if name.is_empty() {
            return Err(WriterError::InvalidOptions { details: "empty option name".to_string() }.into());
        }

        let options = match stream {
            StreamType::Video => &mut self.video_options,
            StreamType::Audio => &mut self.audio_options,
        };
        options.retain(|(existing, _)| existing != name);
        options.push((name.to_string(), value.to_string()));
        Ok(())
    }

    pub fn frames_written(&self) -> i64 {
        self.frames_written
    }

    fn validate(&self) -> Result<()> {
        let info = &self.info;
        if !info.has_video && !info.has_audio {
            return Err(WriterError::InvalidOptions {
                details: "neither video nor audio is enabled".to_string(),
            }
            .into());
        }

        if info.has_video {
            if info.vcodec.is_empty() {
                return Err(WriterError::InvalidCodec { codec: info.vcodec.clone() }.into());
            }
            if info.width == 0 || info.height == 0 {
                return Err(WriterError::InvalidOptions {
                    details: format!("invalid frame size {}x{}", info.width, info.height),
                }
                .into());
            }
            if info.fps.num <= 0 || info.fps.den <= 0 {
                return Err(WriterError::InvalidOptions { details: format!("invalid frame rate {}", info.fps) }.into());
            }
        }

        if info.has_audio {
            if info.acodec.is_empty() {
                return Err(WriterError::InvalidCodec { codec: info.acodec.clone() }.into());
            }
            if info.sample_rate == 0 {
                return Err(WriterError::InvalidSampleRate { sample_rate: info.sample_rate }.into());
            }
            if info.channels == 0 {
                return Err(WriterError::InvalidChannels { channels: info.channels }.into());
            }
        }
        Ok(())
    }

    /// Reject codecs the installed ffmpeg cannot encode
    fn check_encoders(&self) -> Result<()> {
        let output = Command::new(&self.config.binary)
            .args(["-hide_banner", "-encoders"])
            .output()
            .map_err(|e| WriterError::EncodingFailed {
                reason: format!("failed to run {}: {}", self.config.binary, e),
            })?;

        if !output.status.success() {
            warn!("Could not list encoders, skipping codec check");
            return Ok(());
        }

        let listing = String::from_utf8_lossy(&output.stdout);
        let wanted = [
            (self.info.has_video, &self.info.vcodec),
            (self.info.has_audio, &self.info.acodec),
        ];
        for (enabled, codec) in wanted {
            if enabled && !encoder_listed(&listing, codec) {
                return Err(WriterError::InvalidCodec { codec: codec.clone() }.into());
            }
        }
        Ok(())
    }

    fn metadata_args(&self) -> Vec<String> {
        self.info
            .metadata
            .iter()
            .flat_map(|(key, value)| ["-metadata".to_string(), format!("{}={}", key, value)])
            .collect()
    }

    fn audio_codec_args(&self) -> Vec<String> {
        let info = &self.info;
        let mut args = vec!["-c:a".to_string(), info.acodec.clone()];
        if info.audio_bit_rate > 0 {
            args.extend(["-b:a".to_string(), info.audio_bit_rate.to_string()]);
        }
        args.extend([
            "-ar".to_string(),
            info.sample_rate.to_string(),
            "-ac".to_string(),
            info.channels.to_string(),
        ]);
        args.extend(option_args(&self.audio_options));
        args
    }

    /// Arguments for the child that encodes raw RGBA frames from stdin
    fn video_encode_args(&self, output: &Path, with_metadata: bool) -> Vec<String> {
        let info = &self.info;
        let mut args: Vec<String> = [
            "-v", self.config.log_level.as_str(),
            "-y",
            "-f", "rawvideo",
            "-pix_fmt", "rgba",
            "-s", format!("{}x{}", info.width, info.height).as_str(),
            "-r", info.fps.to_string().as_str(),
            "-i", "-",
            "-an",
            "-c:v", info.vcodec.as_str(),
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        if info.video_bit_rate > 0 {
            args.extend(["-b:v".to_string(), info.video_bit_rate.to_string()]);
        }
        args.extend(["-pix_fmt".to_string(), output_pixel_format(&info.vcodec).to_string()]);
        if info.interlaced_frame {
            args.extend([
                "-flags".to_string(),
                "+ilme+ildct".to_string(),
                "-top".to_string(),
                if info.top_field_first { "1" } else { "0" }.to_string(),
            ]);
        }
        let aspect = info.display_ratio;
        if aspect.num > 0 && aspect.den > 0 {
            args.extend(["-aspect".to_string(), format!("{}:{}", aspect.num, aspect.den)]);
        }
        args.extend(option_args(&self.video_options));
        if with_metadata {
            args.extend(self.metadata_args());
        }
        args.push(output.display().to_string());
        args
    }

    /// Arguments for the pass that joins the encoded video with the WAV
    fn mux_args(&self, video: &Path, wav: &Path) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-v".to_string(),
            self.config.log_level.clone(),
            "-y".to_string(),
            "-i".to_string(),
            video.display().to_string(),
            "-i".to_string(),
            wav.display().to_string(),
            "-map".to_string(),
            "0:v:0".to_string(),
            "-map".to_string(),
            "1:a:0".to_string(),
            "-c:v".to_string(),
            "copy".to_string(),
        ];
        args.extend(self.audio_codec_args());
        args.extend(self.metadata_args());
        args.extend(["-shortest".to_string(), self.path.display().to_string()]);
        args
    }

    /// Arguments for encoding an audio-only output straight from the WAV
    fn audio_only_args(&self, wav: &Path) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-v".to_string(),
            self.config.log_level.clone(),
            "-y".to_string(),
            "-i".to_string(),
            wav.display().to_string(),
            "-vn".to_string(),
        ];
        args.extend(self.audio_codec_args());
        args.extend(self.metadata_args());
        args.push(self.path.display().to_string());
        args
    }

    /// Scratch file that holds the video stream until it is muxed
    fn video_scratch_path(&self, dir: &Path) -> PathBuf {
        let ext = self.path.extension().and_then(|e| e.to_str()).unwrap_or("mkv");
        dir.join(format!("video.{}", ext))
    }

    fn ensure_scratch_dir(&mut self) -> Result<PathBuf> {
        if let Some(dir) = &self.scratch_dir {
            return Ok(dir.clone());
        }
        let id = NEXT_SCRATCH_ID.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!("reelkit_{}_{}", std::process::id(), id));
        std::fs::create_dir_all(&dir)?;
        debug!("Using scratch directory {}", dir.display());
        self.scratch_dir = Some(dir.clone());
        Ok(dir)
    }

    fn cleanup(&mut self) {
        if let Some(dir) = self.scratch_dir.take() {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                warn!("Failed to clean up scratch directory {}: {}", dir.display(), e);
            }
        }
    }

    fn encoder_log(&self) -> String {
        self.scratch_dir
            .as_ref()
            .and_then(|dir| std::fs::read_to_string(dir.join("encoder.log")).ok())
            .map(|log| log.trim().to_string())
            .unwrap_or_default()
    }

    fn spawn_encoder(&mut self, output: &Path, with_metadata: bool) -> Result<()> {
        let dir = self.ensure_scratch_dir()?;
        let log = File::create(dir.join("encoder.log"))?;
        let args = self.video_encode_args(output, with_metadata);
        debug!("{} {}", self.config.binary, args.join(" "));

        let mut child = Command::new(&self.config.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log))
            .spawn()
            .map_err(|e| WriterError::EncodingFailed {
                reason: format!("failed to start {}: {}", self.config.binary, e),
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| WriterError::EncodingFailed { reason: "encoder has no stdin".to_string() })?;
        self.stdin = Some(BufWriter::with_capacity(1 << 20, stdin));
        self.encoder = Some(child);
        Ok(())
    }

    fn run(&self, args: &[String]) -> Result<()> {
        debug!("{} {}", self.config.binary, args.join(" "));
        let output = Command::new(&self.config.binary)
            .args(args)
            .output()
            .map_err(|e| WriterError::EncodingFailed {
                reason: format!("failed to run {}: {}", self.config.binary, e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WriterError::EncodingFailed { reason: format!("FFmpeg failed: {}", stderr.trim()) }.into());
        }
        Ok(())
    }

    fn write_video(&mut self, frame: &Frame) -> Result<()> {
        let (width, height) = (self.info.width, self.info.height);
        let resized;
        let bytes = if frame.width() == width && frame.height() == height {
            frame.rgba_bytes()
        } else {
            resized = imageops::resize(frame.image(), width, height, FilterType::Triangle);
            resized.as_raw().as_slice()
        };

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| WriterError::WriterClosed { path: self.name.clone() })?;
        if let Err(e) = stdin.write_all(bytes) {
            let reason = if e.kind() == ErrorKind::BrokenPipe {
                format!("encoder exited early: {}", self.encoder_log())
            } else {
                e.to_string()
            };
            return Err(WriterError::EncodingFailed { reason }.into());
        }
        Ok(())
    }

    fn write_audio(&mut self, frame: &Frame) -> Result<()> {
        let channels = self.info.channels as usize;
        let samples = if frame.channels() == 0 {
            // Keep the audio in step with the video
            Frame::samples_per_frame(self.frames_written + 1, self.info.fps, self.info.sample_rate, self.info.channels)
        } else {
            frame.sample_count()
        };

        let wav = self
            .wav
            .as_mut()
            .ok_or_else(|| WriterError::WriterClosed { path: self.name.clone() })?;
        let source_channels = frame.channels() as usize;
        for i in 0..samples {
            for ch in 0..channels {
                let sample = if source_channels == 0 {
                    0.0
                } else {
                    frame.audio_samples(ch % source_channels).get(i).copied().unwrap_or(0.0)
                };
                wav.write_sample(sample)
                    .map_err(|e| WriterError::EncodingFailed { reason: format!("scratch WAV: {}", e) })?;
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let dir = self.ensure_scratch_dir()?;

        if let Some(mut stdin) = self.stdin.take() {
            stdin.flush()?;
        }
        if let Some(mut child) = self.encoder.take() {
            let status = child.wait()?;
            if !status.success() {
                return Err(WriterError::EncodingFailed {
                    reason: format!("FFmpeg failed: {}", self.encoder_log()),
                }
                .into());
            }
        }

        let wav_path = dir.join("audio.wav");
        if let Some(wav) = self.wav.take() {
            wav.finalize()
                .map_err(|e| WriterError::EncodingFailed { reason: format!("scratch WAV: {}", e) })?;

            if self.info.has_video {
                info!("Muxing audio into {}", self.name);
                let args = self.mux_args(&self.video_scratch_path(&dir), &wav_path);
                self.run(&args)?;
            } else {
                info!("Encoding audio to {}", self.name);
                let args = self.audio_only_args(&wav_path);
                self.run(&args)?;
            }
        }
        Ok(())
    }
}

impl Writer for FfmpegWriter {
    fn name(&self) -> &str {
        &self.name
    }

    fn info(&self) -> &WriterInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut WriterInfo {
        &mut self.info
    }

    fn open(&mut self) -> Result<()> {
        if self.is_open {
            return Err(WriterError::AlreadyOpen { path: self.name.clone() }.into());
        }
        self.validate()?;
        self.check_encoders()?;

        self.info
            .metadata
            .entry("creation_time".to_string())
            .or_insert_with(|| chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string());

        let dir = self.ensure_scratch_dir()?;
        if self.info.has_video {
            // With audio the video goes to scratch first and the mux pass writes the tags
            let output = if self.info.has_audio { self.video_scratch_path(&dir) } else { self.path.clone() };
            let with_metadata = !self.info.has_audio;
            self.spawn_encoder(&output, with_metadata)?;
        }

        if self.info.has_audio {
            let spec = hound::WavSpec {
                channels: self.info.channels,
                sample_rate: self.info.sample_rate,
                bits_per_sample: 32,
                sample_format: hound::SampleFormat::Float,
            };
            let wav = hound::WavWriter::create(dir.join("audio.wav"), spec)
                .map_err(|e| WriterError::EncodingFailed { reason: format!("scratch WAV: {}", e) })?;
            self.wav = Some(wav);
        }

        self.frames_written = 0;
        self.is_open = true;
        info!(
            "Opened {} for writing (video={} audio={})",
            self.name,
            if self.info.has_video { self.info.vcodec.as_str() } else { "none" },
            if self.info.has_audio { self.info.acodec.as_str() } else { "none" }
        );
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.is_open
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if !self.is_open {
            return Err(WriterError::WriterClosed { path: self.name.clone() }.into());
        }
        if self.info.has_video {
            self.write_video(frame)?;
        }
        if self.info.has_audio {
            self.write_audio(frame)?;
        }
        self.frames_written += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.is_open {
            return Ok(());
        }
        self.is_open = false;

        let result = self.finish();
        self.info.video_length = self.frames_written;
        self.cleanup();

        match &result {
            Ok(()) => info!("Closed {} after {} frames", self.name, self.frames_written),
            Err(e) => warn!("Closing {} failed: {}", self.name, e),
        }
        result
    }
}

impl Drop for FfmpegWriter {
    fn drop(&mut self) {
        self.stdin = None;
        if let Some(mut child) = self.encoder.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        self.wav = None;
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReelError;

    fn writer() -> FfmpegWriter {
        let mut writer = FfmpegWriter::with_config("out/movie.mp4", FfmpegConfig::default());
        writer.set_video_options(true, "libx264", Fraction::new(24, 1), 720, 480, Fraction::new(1, 1), false, true, 3_000_000);
        writer.set_audio_options(true, "aac", 48000, 2, ChannelLayout::Stereo, 128_000);
        writer
    }

    #[test]
    fn test_video_args() {
        let mut writer = writer();
        writer.set_option(StreamType::Video, "crf", "10").unwrap();
        writer.set_option(StreamType::Video, "-crf", "12").unwrap();
        writer.info_mut().metadata.insert("title".to_string(), "Sintel".to_string());

        let args = writer.video_encode_args(Path::new("out.mp4"), true).join(" ");
        assert!(args.starts_with("-v error -y -f rawvideo -pix_fmt rgba -s 720x480 -r 24/1 -i - -an -c:v libx264"));
        assert!(args.contains("-b:v 3000000 -pix_fmt yuv420p -aspect 3:2 -crf 12 -metadata title=Sintel"));
        assert!(!args.contains("-crf 10"));
        assert!(args.ends_with("out.mp4"));
        assert!(!args.contains("-flags"));
    }

    #[test]
    fn test_interlaced_args() {
        let mut writer = writer();
        writer.set_video_options(true, "png", Fraction::new(25, 1), 720, 576, Fraction::new(16, 15), true, false, 0);
        let args = writer.video_encode_args(Path::new("out.mov"), false).join(" ");
        assert!(args.contains("-pix_fmt rgba -flags +ilme+ildct -top 0"));
        assert!(!args.contains("-b:v"));
        assert!(!args.contains("-metadata"));
    }

    #[test]
    fn test_mux_and_audio_only_args() {
        let mut writer = writer();
        writer.info_mut().metadata.insert("artist".to_string(), "Blender".to_string());
        let mux = writer.mux_args(Path::new("v.mp4"), Path::new("a.wav")).join(" ");
        assert!(mux.contains("-i v.mp4 -i a.wav -map 0:v:0 -map 1:a:0 -c:v copy -c:a aac -b:a 128000 -ar 48000 -ac 2"));
        assert!(mux.contains("-metadata artist=Blender"));
        assert!(mux.ends_with("-shortest out/movie.mp4"));

        let audio = writer.audio_only_args(Path::new("a.wav")).join(" ");
        assert!(audio.starts_with("-v error -y -i a.wav -vn -c:a aac"));
    }

    #[test]
    fn test_encoder_listing() {
        let listing = "Encoders:\n V..... = Video\n ------\n V....D libx264              libx264 H.264\n A....D aac                  AAC (Advanced Audio Coding)\n";
        assert!(encoder_listed(listing, "libx264"));
        assert!(encoder_listed(listing, "aac"));
        assert!(!encoder_listed(listing, "Video"));
        assert!(!encoder_listed(listing, "libvpx"));
    }

    #[test]
    fn test_validation() {
        let mut writer = FfmpegWriter::with_config("x.mp4", FfmpegConfig::default());
        assert!(matches!(writer.open(), Err(ReelError::Writer(WriterError::InvalidOptions { .. }))));

        writer.set_audio_options(true, "aac", 0, 2, ChannelLayout::Stereo, 0);
        assert!(matches!(writer.validate(), Err(ReelError::Writer(WriterError::InvalidSampleRate { .. }))));

        writer.set_audio_options(true, "aac", 44100, 0, ChannelLayout::Stereo, 0);
        assert!(matches!(writer.validate(), Err(ReelError::Writer(WriterError::InvalidChannels { .. }))));

        writer.set_audio_options(true, "", 44100, 2, ChannelLayout::Stereo, 0);
        assert!(matches!(writer.validate(), Err(ReelError::Writer(WriterError::InvalidCodec { .. }))));
    }

    #[test]
    fn test_write_before_open() {
        let mut writer = writer();
        let frame = Frame::new(1, 720, 480, [0, 0, 0, 255], 0, 2);
        assert!(matches!(writer.write_frame(&frame), Err(ReelError::Writer(WriterError::WriterClosed { .. }))));
        assert!(writer.close().is_ok());
    }

    #[test]
    fn test_missing_binary() {
        let config = FfmpegConfig { binary: "/no/such/ffmpeg".to_string(), ..FfmpegConfig::default() };
        let mut writer = FfmpegWriter::with_config("x.mp4", config);
        writer.set_video_options(true, "libx264", Fraction::new(30, 1), 64, 64, Fraction::new(1, 1), false, true, 0);
        assert!(matches!(writer.open(), Err(ReelError::Writer(WriterError::EncodingFailed { .. }))));
        assert!(!writer.is_open());
    }
}
