use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use reelkit::{
    config::Config,
    core::{ChannelLayout, Fraction, Frame, GravityType, Keyframe},
    effects::{Effect, EffectRegistry, Mask},
    player::{CallbackRenderer, Player},
    readers::{self, HtmlReader, ImageReader, Reader},
    timeline::{Clip, Timeline},
    writers::{FfmpegWriter, ImageSequenceWriter, Writer},
};

#[derive(Parser)]
#[command(
    name = "reelkit",
    version,
    about = "Read, compose and encode video frame by frame",
    long_about = "reelkit opens media files, stills and HTML as numbered frames, layers them on a timeline with keyframed effects, and encodes the result through ffmpeg."
)]
struct Cli {
    /// Configuration file (optional)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print stream information for a media file or image
    Info {
        input: PathBuf,
    },

    /// Re-encode a file frame by frame
    Transcode(TranscodeArgs),

    /// Render an HTML snippet to a video
    Html(HtmlArgs),

    /// Wipe between two images with an animated mask
    Wipe(WipeArgs),

    /// Play a file in real time, logging each frame
    Play(PlayArgs),

    /// List the available effects
    Effects,
}

#[derive(Args)]
struct TranscodeArgs {
    input: PathBuf,
    output: PathBuf,

    /// First frame to write
    #[arg(long, default_value_t = 1)]
    start: i64,

    /// Last frame to write (defaults to the whole input)
    #[arg(long)]
    frames: Option<i64>,

    #[arg(long)]
    vcodec: Option<String>,

    #[arg(long)]
    acodec: Option<String>,

    /// Output frame rate, e.g. 24 or 30000/1001
    #[arg(long)]
    fps: Option<Fraction>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    /// Metadata tag, may be repeated
    #[arg(long = "meta", value_parser = parse_key_value)]
    meta: Vec<(String, String)>,
}

#[derive(Args)]
struct HtmlArgs {
    output: PathBuf,

    /// HTML markup to render
    #[arg(long, default_value = "<p>Hello, World!</p>")]
    html: String,

    #[arg(long, default_value = "p { color: #ffffff; font-size: 48px; }")]
    css: String,

    #[arg(long, default_value = "#000000")]
    background: String,

    /// Seconds of video to write
    #[arg(long, default_value_t = 5.0)]
    seconds: f64,
}

#[derive(Args)]
struct WipeArgs {
    /// Image shown underneath
    bottom: PathBuf,

    /// Image wiped away
    top: PathBuf,

    /// Grayscale mask driving the wipe
    mask: PathBuf,

    /// Output pattern; `%04d` or `{n}` is replaced by the frame number
    #[arg(short, long, default_value = "wipe_%04d.png")]
    output: String,

    #[arg(long, default_value_t = 24)]
    frames: i64,

    /// Mask contrast held over the whole wipe
    #[arg(long, default_value_t = 20.0)]
    contrast: f64,
}

#[derive(Args)]
struct PlayArgs {
    input: PathBuf,

    /// Playback speed; negative plays backwards
    #[arg(long, default_value_t = 1.0)]
    speed: f64,

    /// Save every shown frame into this directory
    #[arg(long)]
    save_dir: Option<PathBuf>,
}

fn parse_key_value(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{}'", s))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG takes precedence over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting reelkit v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = match &cli.config {
        Some(config_path) => {
            info!("Loading configuration from {:?}", config_path);
            Config::from_file(config_path)?
        }
        None => {
            debug!("Using default configuration");
            Config::default()
        }
    };
    config.apply_env();
    config.validate()?;

    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(config.render.threads)
        .build_global()
    {
        warn!("Could not size the render pool: {}", e);
    }

    match cli.command {
        Command::Info { input } => {
            tokio::task::spawn_blocking(move || show_info(&input, &config)).await??;
        }
        Command::Transcode(args) => {
            tokio::task::spawn_blocking(move || transcode(args, &config)).await??;
        }
        Command::Html(args) => {
            tokio::task::spawn_blocking(move || render_html(args, &config)).await??;
        }
        Command::Wipe(args) => {
            tokio::task::spawn_blocking(move || wipe(args, &config)).await??;
        }
        Command::Play(args) => play(args, &config).await?,
        Command::Effects => list_effects(),
    }

    Ok(())
}

fn show_info(input: &Path, config: &Config) -> Result<()> {
    let path = input.to_string_lossy();
    let mut reader = readers::open_path(&path, &config.ffmpeg)
        .with_context(|| format!("opening {}", path))?;
    reader.display_info(&mut std::io::stdout())?;
    reader.close();
    Ok(())
}

fn transcode(args: TranscodeArgs, config: &Config) -> Result<()> {
    let input = args.input.to_string_lossy();
    let mut reader = readers::open_path(&input, &config.ffmpeg)
        .with_context(|| format!("opening {}", input))?;
    // Re-time rather than pumping source frames one to one
    if let Some(fps) = args.fps {
        reader = readers::map_to_fps(reader, fps);
    }
    let source = reader.info().clone();

    let mut writer = FfmpegWriter::with_config(&args.output, config.ffmpeg.clone());
    writer.copy_reader_info(&source);

    let encode = &config.encode;
    if source.has_video {
        writer.set_video_options(
            true,
            args.vcodec.as_deref().unwrap_or(&encode.video_codec),
            args.fps.unwrap_or(source.fps),
            args.width.unwrap_or(source.width),
            args.height.unwrap_or(source.height),
            source.pixel_ratio,
            source.interlaced_frame,
            source.top_field_first,
            encode.video_bit_rate,
        );
    }
    if source.has_audio {
        writer.set_audio_options(
            true,
            args.acodec.as_deref().unwrap_or(&encode.audio_codec),
            source.sample_rate,
            source.channels,
            source.channel_layout,
            encode.audio_bit_rate,
        );
    }
    for (key, value) in args.meta {
        writer.info_mut().metadata.insert(key, value);
    }

    writer.display_info(&mut std::io::stdout())?;
    writer.open()?;

    let last = args.frames.unwrap_or(source.video_length).min(source.video_length);
    writer.write_reader_frames(reader.as_mut(), args.start, last)?;
    writer.close()?;
    reader.close();

    info!("Transcode complete! Output saved to: {:?}", args.output);
    Ok(())
}

fn render_html(args: HtmlArgs, config: &Config) -> Result<()> {
    let encode = &config.encode;
    let mut reader = HtmlReader::new(
        encode.width,
        encode.height,
        0,
        0,
        GravityType::Center,
        args.html,
        args.css,
        args.background,
    );
    reader.open()?;

    let mut writer = FfmpegWriter::with_config(&args.output, config.ffmpeg.clone());
    writer.set_video_options(
        true,
        &encode.video_codec,
        encode.fps,
        encode.width,
        encode.height,
        Fraction::new(1, 1),
        false,
        false,
        encode.video_bit_rate,
    );
    writer.open()?;

    let frames = (args.seconds * encode.fps.to_f64()).round() as i64;
    writer.write_reader_frames(&mut reader, 1, frames)?;
    writer.close()?;
    reader.close();

    info!("Wrote {} frames of HTML to {:?}", frames, args.output);
    Ok(())
}

fn wipe(args: WipeArgs, config: &Config) -> Result<()> {
    let encode = &config.encode;
    let mut timeline = Timeline::new(
        encode.width,
        encode.height,
        encode.fps,
        encode.sample_rate,
        encode.channels,
        ChannelLayout::from_channels(encode.channels),
    );
    timeline.apply_config(config);

    let seconds = args.frames as f64 / encode.fps.to_f64();
    for (layer, path) in [(1, &args.bottom), (2, &args.top)] {
        let mut clip = Clip::new(Box::new(ImageReader::new(path)));
        clip.placement.layer = layer;
        clip.placement.end = seconds;
        timeline.add_clip(clip)?;
    }

    let (brightness, contrast) = wipe_curves(args.frames, args.contrast);
    let mut mask = Mask::new(Box::new(ImageReader::new(&args.mask)), brightness, contrast);
    {
        let placement = mask.placement_mut();
        placement.layer = 2;
        placement.end = seconds;
    }
    timeline.add_effect(Box::new(mask));

    timeline.open()?;
    let mut writer = ImageSequenceWriter::new(&args.output);
    writer.open()?;
    writer.write_reader_frames(&mut timeline, 1, args.frames)?;
    writer.close()?;
    timeline.close();

    info!("Wrote {} wipe frames to {}", writer.written().len(), args.output);
    Ok(())
}

/// Mask brightness sweeps from 1 to -1 over the wipe at a fixed contrast
fn wipe_curves(frames: i64, contrast: f64) -> (Keyframe, Keyframe) {
    let mut brightness = Keyframe::default();
    brightness.add_point(1.0, 1.0);
    brightness.add_point(frames as f64, -1.0);
    let mut held = Keyframe::default();
    held.add_point(1.0, contrast);
    held.add_point(frames as f64, contrast);
    (brightness, held)
}

async fn play(args: PlayArgs, config: &Config) -> Result<()> {
    let path = args.input.to_string_lossy().into_owned();
    let reader = tokio::task::spawn_blocking({
        let ffmpeg = config.ffmpeg.clone();
        move || readers::open_path(&path, &ffmpeg)
    })
    .await??;

    if let Some(dir) = &args.save_dir {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {:?}", dir))?;
    }
    let save_dir = args.save_dir.clone();
    let renderer = CallbackRenderer::new(move |frame: &Frame| {
        info!("Frame {} ({}x{})", frame.number, frame.width(), frame.height());
        if let Some(dir) = &save_dir {
            let target = dir.join(format!("frame_{:05}.png", frame.number));
            if let Err(e) = frame.save(&target, 1.0) {
                warn!("Could not save {:?}: {}", target, e);
            }
        }
    });

    let mut player = Player::new(reader, Box::new(renderer));
    player.set_speed(args.speed);
    if args.speed < 0.0 {
        player.seek(i64::MAX)?;
    }
    player.play()?;

    tokio::select! {
        _ = player.wait_while_playing() => info!("Playback reached the end at frame {}", player.position()),
        _ = tokio::signal::ctrl_c() => info!("Interrupted at frame {}", player.position()),
    }

    player.stop();
    player.join().await.map_err(|e| anyhow!("playback failed: {}", e))?;
    Ok(())
}

fn list_effects() {
    let registry = EffectRegistry::new();
    for effect in registry.available() {
        println!("{:<12} {}", effect.class_name, effect.description);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wipe_curves() {
        let (brightness, contrast) = wipe_curves(24, 20.0);
        assert_eq!(brightness.get_value(1), 1.0);
        assert_eq!(brightness.get_value(24), -1.0);
        assert!(brightness.get_value(12) < 1.0 && brightness.get_value(12) > -1.0);
        for frame in [1, 12, 24] {
            assert!((contrast.get_value(frame) - 20.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_wipe_contrast_defaults_to_twenty() {
        let cli = Cli::try_parse_from(["reelkit", "wipe", "a.png", "b.png", "mask.png"]).unwrap();
        match cli.command {
            Command::Wipe(args) => {
                assert_eq!(args.contrast, 20.0);
                assert_eq!(args.frames, 24);
            }
            _ => panic!("expected the wipe command"),
        }
    }

    #[test]
    fn test_transcode_fps_parses_fraction() {
        let cli = Cli::try_parse_from(["reelkit", "transcode", "in.mp4", "out.mp4", "--fps", "30000/1001"]).unwrap();
        match cli.command {
            Command::Transcode(args) => assert_eq!(args.fps, Some(Fraction::new(30000, 1001))),
            _ => panic!("expected the transcode command"),
        }
    }
}
