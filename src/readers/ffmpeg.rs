use std::collections::BTreeMap;
use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{
    cache::FrameCache,
    config::{CacheConfig, FfmpegConfig},
    core::{ChannelLayout, Fraction, Frame},
    error::{ReaderError, ReelError, Result},
    readers::{Reader, ReaderInfo},
};

/// Forward jumps up to this many frames are decoded through instead of
/// restarting the decoder
const READ_AHEAD_FRAMES: i64 = 48;

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    index: i32,
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    pix_fmt: Option<String>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    time_base: Option<String>,
    sample_aspect_ratio: Option<String>,
    field_order: Option<String>,
    bit_rate: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u16>,
    duration: Option<String>,
    nb_frames: Option<String>,
    #[serde(default)]
    tags: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
    #[serde(default)]
    tags: BTreeMap<String, String>,
}

/// A usable fraction from ffprobe's `30000/1001` or `16:9` notation
fn probe_fraction(value: Option<&String>) -> Option<Fraction> {
    value
        .and_then(|v| v.parse::<Fraction>().ok())
        .filter(|f| f.num > 0 && f.den > 0)
}

fn probe_number<T: std::str::FromStr>(value: Option<&String>) -> Option<T> {
    value.and_then(|v| v.trim().parse::<T>().ok())
}

/// Turn `ffprobe -print_format json -show_format -show_streams` output into a [`ReaderInfo`]
fn parse_probe(json: &str, path: &str) -> Result<ReaderInfo> {
    let probe: ProbeOutput = serde_json::from_str(json)
        .map_err(|e| ReaderError::InvalidFormat { details: format!("{}: unreadable ffprobe output: {}", path, e) })?;

    let video = probe.streams.iter().find(|s| s.codec_type.as_deref() == Some("video"));
    let audio = probe.streams.iter().find(|s| s.codec_type.as_deref() == Some("audio"));
    if video.is_none() && audio.is_none() {
        return Err(ReaderError::NoStreamsFound { path: path.to_string() }.into());
    }

    let mut info = ReaderInfo::default();

    if let Some(format) = &probe.format {
        info.duration = probe_number(format.duration.as_ref()).unwrap_or(0.0);
        info.file_size = probe_number(format.size.as_ref()).unwrap_or(0);
        info.metadata.extend(format.tags.iter().map(|(k, v)| (k.to_lowercase(), v.clone())));
    }

    if let Some(v) = video {
        info.has_video = true;
        info.video_stream_index = v.index;
        info.vcodec = v.codec_name.clone().unwrap_or_default();
        info.width = v.width.unwrap_or(0);
        info.height = v.height.unwrap_or(0);
        info.pixel_format = v.pix_fmt.clone().unwrap_or_default();
        info.fps = probe_fraction(v.avg_frame_rate.as_ref())
            .or_else(|| probe_fraction(v.r_frame_rate.as_ref()))
            .unwrap_or(Fraction::new(30, 1));
        info.video_timebase = probe_fraction(v.time_base.as_ref()).unwrap_or_else(|| info.fps.reciprocal());
        info.pixel_ratio = probe_fraction(v.sample_aspect_ratio.as_ref()).unwrap_or_default();
        info.video_bit_rate = probe_number(v.bit_rate.as_ref())
            .or_else(|| probe.format.as_ref().and_then(|f| probe_number(f.bit_rate.as_ref())))
            .unwrap_or(0);

        match v.field_order.as_deref() {
            Some("tt") | Some("tb") => {
                info.interlaced_frame = true;
                info.top_field_first = true;
            }
            Some("bb") | Some("bt") => {
                info.interlaced_frame = true;
                info.top_field_first = false;
            }
            _ => {}
        }

        if info.duration <= 0.0 {
            info.duration = probe_number(v.duration.as_ref()).unwrap_or(0.0);
        }
        info.has_single_image = probe_number::<i64>(v.nb_frames.as_ref()) == Some(1);
        for (k, value) in &v.tags {
            info.metadata.entry(k.to_lowercase()).or_insert_with(|| value.clone());
        }
    } else {
        info.fps = Fraction::new(30, 1);
        info.video_timebase = info.fps.reciprocal();
    }

    if let Some(a) = audio {
        info.has_audio = true;
        info.audio_stream_index = a.index;
        info.acodec = a.codec_name.clone().unwrap_or_default();
        info.sample_rate = probe_number(a.sample_rate.as_ref()).unwrap_or(44100);
        info.channels = a.channels.unwrap_or(2);
        info.channel_layout = ChannelLayout::from_channels(info.channels);
        info.audio_bit_rate = probe_number(a.bit_rate.as_ref()).unwrap_or(0);
        info.audio_timebase = probe_fraction(a.time_base.as_ref())
            .unwrap_or_else(|| Fraction::new(1, info.sample_rate.max(1) as i32));
        if info.duration <= 0.0 {
            info.duration = probe_number(a.duration.as_ref()).unwrap_or(0.0);
        }
    }

    info.update_video_length();
    info.update_display_ratio();
    Ok(info)
}

/// Seconds at which frame `number` starts
fn frame_start_seconds(number: i64, fps: Fraction) -> f64 {
    let fps = fps.to_f64();
    if fps <= 0.0 {
        return 0.0;
    }
    (number - 1).max(0) as f64 / fps
}

fn input_args(config: &FfmpegConfig, path: &str, start: f64) -> Vec<String> {
    let mut args = vec!["-v".to_string(), config.log_level.clone(), "-nostdin".to_string()];
    if start > 0.0 {
        args.extend(["-ss".to_string(), format!("{:.6}", start)]);
    }
    args.extend(["-i".to_string(), path.to_string()]);
    args
}

/// Arguments for a child that streams RGBA frames at a constant rate on stdout
fn video_decode_args(config: &FfmpegConfig, path: &str, start: f64, fps: Fraction) -> Vec<String> {
    let mut args = input_args(config, path, start);
    args.extend(
        ["-map", "0:v:0", "-an", "-r", fps.to_string().as_str(), "-f", "rawvideo", "-pix_fmt", "rgba", "-"]
            .iter()
            .map(|s| s.to_string()),
    );
    args
}

/// Arguments for a child that streams interleaved f32 samples on stdout
fn audio_decode_args(config: &FfmpegConfig, path: &str, start: f64, sample_rate: u32, channels: u16) -> Vec<String> {
    let mut args = input_args(config, path, start);
    args.extend(
        [
            "-map", "0:a:0", "-vn",
            "-f", "f32le",
            "-ac", channels.to_string().as_str(),
            "-ar", sample_rate.to_string().as_str(),
            "-",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    args
}

/// A running decoder child; killed when dropped
struct Pipe {
    child: Child,
    stdout: BufReader<ChildStdout>,
}

impl Pipe {
    fn spawn(binary: &str, args: &[String]) -> Result<Self> {
        let mut child = Command::new(binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| ReaderError::DecodingFailed { reason: format!("failed to start {}: {}", binary, e) })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ReaderError::DecodingFailed { reason: format!("{} has no stdout", binary) })?;

        Ok(Self { child, stdout: BufReader::with_capacity(1 << 20, stdout) })
    }

    /// Fill as much of `buf` as the stream allows; returns bytes read
    fn read_up_to(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.stdout.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(ReelError::Io(e)),
            }
        }
        Ok(filled)
    }
}

impl Drop for Pipe {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Video and audio children positioned at the same frame
struct Decoder {
    video: Option<Pipe>,
    audio: Option<Pipe>,
    next_frame: i64,
}

/// Decodes any container ffmpeg understands by streaming raw frames from
/// `ffmpeg` child processes
pub struct FfmpegReader {
    path: PathBuf,
    name: String,
    config: FfmpegConfig,
    info: ReaderInfo,
    is_open: bool,
    cache: FrameCache,
    decoder: Option<Decoder>,
    last_frame: Option<Arc<Frame>>,
}

impl FfmpegReader {
    /// Reader using the ffmpeg binaries from the environment
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self::with_config(path, FfmpegConfig::from_env())
    }

    pub fn with_config<P: AsRef<Path>>(path: P, config: FfmpegConfig) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            name: path.display().to_string(),
            path,
            config,
            info: ReaderInfo::default(),
            is_open: false,
            cache: FrameCache::new(CacheConfig::default().max_bytes),
            decoder: None,
            last_frame: None,
        }
    }

    /// Replace the decoded-frame cache (e.g. to change its budget)
    pub fn with_cache(mut self, cache: FrameCache) -> Self {
        self.cache = cache;
        self
    }

    fn probe(&self) -> Result<ReaderInfo> {
        let output = Command::new(&self.config.probe)
            .args([
                "-v", "error",
                "-print_format", "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(&self.path)
            .output()
            .map_err(|e| ReaderError::DecodingFailed {
                reason: format!("failed to run {}: {}", self.config.probe, e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("ffprobe rejected {}: {}", self.name, stderr.trim());
            return Err(ReaderError::InvalidFile { path: self.name.clone() }.into());
        }

        let json = String::from_utf8_lossy(&output.stdout);
        parse_probe(&json, &self.name)
    }

    fn spawn_decoder(&mut self, number: i64) -> Result<()> {
        // Kill the old children before starting new ones
        self.decoder = None;

        let start = frame_start_seconds(number, self.info.fps);
        debug!("Starting decoder for {} at frame {} ({:.3}s)", self.name, number, start);

        let video = if self.info.has_video {
            let args = video_decode_args(&self.config, &self.name, start, self.info.fps);
            Some(Pipe::spawn(&self.config.binary, &args)?)
        } else {
            None
        };

        let audio = if self.info.has_audio {
            let args = audio_decode_args(&self.config, &self.name, start, self.info.sample_rate, self.info.channels);
            Some(Pipe::spawn(&self.config.binary, &args)?)
        } else {
            None
        };

        self.decoder = Some(Decoder { video, audio, next_frame: number });
        Ok(())
    }

    /// Decode the frame the children are positioned at; `None` once the streams end
    fn decode_next(&mut self) -> Result<Option<Arc<Frame>>> {
        let info = &self.info;
        let decoder = match self.decoder.as_mut() {
            Some(d) => d,
            None => return Ok(None),
        };
        let number = decoder.next_frame;

        let mut frame = match decoder.video.as_mut() {
            Some(video) => {
                let mut buf = vec![0u8; info.width as usize * info.height as usize * 4];
                if video.read_up_to(&mut buf)? < buf.len() {
                    return Ok(None);
                }
                Frame::from_rgba_bytes(number, info.width, info.height, buf)?
            }
            None => {
                if info.video_length > 0 && number > info.video_length {
                    return Ok(None);
                }
                Frame::new(number, info.width.max(1), info.height.max(1), [0, 0, 0, 0], 0, 0)
            }
        };
        frame.pixel_ratio = info.pixel_ratio;

        if let Some(audio) = decoder.audio.as_mut() {
            let channels = info.channels.max(1) as usize;
            let samples = Frame::samples_per_frame(number, info.fps, info.sample_rate, info.channels);
            let mut buf = vec![0u8; samples * channels * 4];
            // A short read at the tail leaves silence
            audio.read_up_to(&mut buf)?;

            let mut planar = vec![Vec::with_capacity(samples); channels];
            for (i, chunk) in buf.chunks_exact(4).enumerate() {
                let sample = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                planar[i % channels].push(sample);
            }
            frame.resize_audio(info.channels, 0, info.sample_rate, info.channel_layout);
            for (ch, samples) in planar.iter().enumerate() {
                frame.add_audio(true, ch, 0, samples, 1.0);
            }
        }

        decoder.next_frame += 1;
        Ok(Some(Arc::new(frame)))
    }

    /// The last decoded image standing in for a frame past the end
    fn repeat_last(&self, number: i64) -> Result<Arc<Frame>> {
        let last = self.last_frame.as_ref().ok_or_else(|| ReaderError::DecodingFailed {
            reason: format!("{} produced no frames", self.name),
        })?;

        let samples = Frame::samples_per_frame(number, self.info.fps, self.info.sample_rate, self.info.channels);
        let mut frame = Frame::from_image(number, last.image().clone());
        frame.pixel_ratio = last.pixel_ratio;
        frame.resize_audio(self.info.channels, samples, self.info.sample_rate, self.info.channel_layout);
        Ok(Arc::new(frame))
    }
}

impl Reader for FfmpegReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn info(&self) -> &ReaderInfo {
        &self.info
    }

    fn open(&mut self) -> Result<()> {
        if self.is_open {
            return Ok(());
        }
        if !self.path.is_file() {
            return Err(ReaderError::InvalidFile { path: self.name.clone() }.into());
        }

        self.info = self.probe()?;
        self.is_open = true;

        info!(
            "Opened {}: {}x{} @ {} fps, {:.2}s, video={} audio={}",
            self.name,
            self.info.width,
            self.info.height,
            self.info.fps,
            self.info.duration,
            self.info.vcodec,
            self.info.acodec
        );
        Ok(())
    }

    fn close(&mut self) {
        if self.is_open {
            debug!("Closing {}", self.name);
        }
        self.decoder = None;
        self.cache.clear();
        self.last_frame = None;
        self.is_open = false;
    }

    fn is_open(&self) -> bool {
        self.is_open
    }

    fn get_frame(&mut self, number: i64) -> Result<Arc<Frame>> {
        if !self.is_open {
            return Err(ReaderError::ReaderClosed { path: self.name.clone() }.into());
        }

        let mut number = number.max(1);
        if self.info.video_length > 0 {
            number = number.min(self.info.video_length);
        }

        if let Some(frame) = self.cache.get(number) {
            return Ok(frame);
        }

        let restart = match &self.decoder {
            Some(d) => number < d.next_frame || number - d.next_frame > READ_AHEAD_FRAMES,
            None => true,
        };
        if restart {
            self.spawn_decoder(number)?;
        }

        loop {
            match self.decode_next()? {
                Some(frame) => {
                    self.cache.add(frame.clone());
                    self.last_frame = Some(frame.clone());
                    if frame.number >= number {
                        return Ok(frame);
                    }
                }
                None => {
                    debug!("{} ended before frame {}, repeating last frame", self.name, number);
                    self.decoder = None;
                    return self.repeat_last(number);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROBE_JSON: &str = r#"{
        "streams": [
            {
                "index": 0,
                "codec_name": "h264",
                "codec_type": "video",
                "width": 1280,
                "height": 720,
                "pix_fmt": "yuv420p",
                "sample_aspect_ratio": "1:1",
                "field_order": "progressive",
                "r_frame_rate": "30000/1001",
                "avg_frame_rate": "30000/1001",
                "time_base": "1/30000",
                "bit_rate": "2500000",
                "nb_frames": "300"
            },
            {
                "index": 1,
                "codec_name": "aac",
                "codec_type": "audio",
                "sample_rate": "48000",
                "channels": 2,
                "time_base": "1/48000",
                "bit_rate": "128000",
                "tags": { "language": "eng" }
            }
        ],
        "format": {
            "duration": "10.010000",
            "size": "3145728",
            "bit_rate": "2700000",
            "tags": { "TITLE": "Sintel" }
        }
    }"#;

    #[test]
    fn test_parse_probe() {
        let info = parse_probe(PROBE_JSON, "movie.mp4").unwrap();

        assert!(info.has_video && info.has_audio && !info.has_single_image);
        assert_eq!((info.width, info.height), (1280, 720));
        assert_eq!(info.fps, Fraction::new(30000, 1001));
        assert_eq!(info.video_length, 300);
        assert_eq!(info.display_ratio, Fraction::new(16, 9));
        assert_eq!(info.video_bit_rate, 2_500_000);
        assert_eq!(info.sample_rate, 48000);
        assert_eq!(info.channel_layout, ChannelLayout::Stereo);
        assert_eq!(info.audio_stream_index, 1);
        assert_eq!(info.file_size, 3_145_728);
        assert_eq!(info.metadata.get("title").map(String::as_str), Some("Sintel"));
        assert!(!info.interlaced_frame);
    }

    #[test]
    fn test_parse_probe_without_streams() {
        let err = parse_probe(r#"{"streams": [], "format": {}}"#, "empty.bin").unwrap_err();
        assert!(matches!(err, ReelError::Reader(ReaderError::NoStreamsFound { .. })));

        assert!(parse_probe("not json", "x").is_err());
    }

    #[test]
    fn test_parse_probe_audio_only() {
        let json = r#"{"streams": [{"index": 0, "codec_type": "audio", "codec_name": "mp3",
            "sample_rate": "44100", "channels": 1}], "format": {"duration": "2.0"}}"#;
        let info = parse_probe(json, "song.mp3").unwrap();
        assert!(!info.has_video);
        assert_eq!(info.fps, Fraction::new(30, 1));
        assert_eq!(info.video_length, 60);
        assert_eq!(info.channel_layout, ChannelLayout::Mono);
    }

    #[test]
    fn test_decode_args() {
        let config = FfmpegConfig::default();
        let args = video_decode_args(&config, "in.mov", 2.5, Fraction::new(24, 1));
        let joined = args.join(" ");
        assert!(joined.starts_with("-v error -nostdin -ss 2.500000 -i in.mov"));
        assert!(joined.ends_with("-r 24/1 -f rawvideo -pix_fmt rgba -"));

        let args = audio_decode_args(&config, "in.mov", 0.0, 44100, 2);
        assert!(!args.contains(&"-ss".to_string()));
        assert!(args.join(" ").contains("-f f32le -ac 2 -ar 44100"));
    }

    #[test]
    fn test_frame_start_seconds() {
        assert_eq!(frame_start_seconds(1, Fraction::new(25, 1)), 0.0);
        assert!((frame_start_seconds(26, Fraction::new(25, 1)) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_open_missing_and_closed() {
        let mut reader = FfmpegReader::with_config("/no/such/file.mp4", FfmpegConfig::default());
        assert!(matches!(reader.get_frame(1), Err(ReelError::Reader(ReaderError::ReaderClosed { .. }))));
        assert!(matches!(reader.open(), Err(ReelError::Reader(ReaderError::InvalidFile { .. }))));
    }
}
