//! Real-time playback of any reader into a frame callback

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    core::Frame,
    error::{ReelError, Result},
    readers::Reader,
};

/// Receives every frame the player shows
pub trait Renderer: Send {
    fn render(&mut self, frame: &Frame) -> Result<()>;
}

/// Adapts a closure into a [`Renderer`]
pub struct CallbackRenderer<F>
where
    F: FnMut(&Frame) + Send,
{
    callback: F,
}

impl<F> CallbackRenderer<F>
where
    F: FnMut(&Frame) + Send,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> Renderer for CallbackRenderer<F>
where
    F: FnMut(&Frame) + Send,
{
    fn render(&mut self, frame: &Frame) -> Result<()> {
        (self.callback)(frame);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackMode {
    Playing,
    Paused,
    Loading,
    Stopped,
}

struct Shared {
    reader: Mutex<Box<dyn Reader>>,
    renderer: Mutex<Box<dyn Renderer>>,
    mode: watch::Sender<PlaybackMode>,
    position: AtomicI64,
    /// f64 bits
    speed: AtomicU64,
    /// f64 bits
    volume: AtomicU64,
    /// Show the current position once even though playback is not running
    redraw: AtomicBool,
}

impl Shared {
    fn speed(&self) -> f64 {
        f64::from_bits(self.speed.load(Ordering::Relaxed))
    }

    fn volume(&self) -> f64 {
        f64::from_bits(self.volume.load(Ordering::Relaxed))
    }

    fn video_length(&self) -> Result<i64> {
        let reader = self.reader.lock().map_err(|_| ReelError::generic("reader lock poisoned"))?;
        Ok(reader.info().video_length.max(1))
    }

    /// Seconds between frames at the current speed
    fn frame_delay(&self) -> Result<Duration> {
        let reader = self.reader.lock().map_err(|_| ReelError::generic("reader lock poisoned"))?;
        let rate = reader.info().fps.to_f64() * self.speed().abs();
        Ok(Duration::from_secs_f64(if rate > 0.0 { 1.0 / rate } else { 0.0 }))
    }

    /// Fetch and show one frame; runs on the blocking pool
    fn show(&self, number: i64) -> Result<()> {
        let frame = {
            let mut reader = self.reader.lock().map_err(|_| ReelError::generic("reader lock poisoned"))?;
            reader.get_frame(number)?
        };

        let volume = self.volume();
        let mut renderer = self.renderer.lock().map_err(|_| ReelError::generic("renderer lock poisoned"))?;
        if (volume - 1.0).abs() > f64::EPSILON && frame.channels() > 0 {
            let mut scaled = (*frame).clone();
            scaled.apply_gain(volume as f32);
            renderer.render(&scaled)
        } else {
            renderer.render(&frame)
        }
    }
}

async fn show(shared: &Arc<Shared>, number: i64) -> Result<()> {
    let shared = shared.clone();
    tokio::task::spawn_blocking(move || shared.show(number))
        .await
        .map_err(|e| ReelError::generic(format!("render task failed: {}", e)))?
}

async fn run(shared: Arc<Shared>) -> Result<()> {
    let mut mode_rx = shared.mode.subscribe();

    loop {
        let mode = *mode_rx.borrow_and_update();
        let speed = shared.speed();

        if mode == PlaybackMode::Stopped {
            break;
        }

        if mode != PlaybackMode::Playing || speed == 0.0 {
            if shared.redraw.swap(false, Ordering::AcqRel) {
                show(&shared, shared.position.load(Ordering::Acquire)).await?;
            }
            if mode_rx.changed().await.is_err() {
                break;
            }
            continue;
        }

        let number = shared.position.load(Ordering::Acquire);
        shared.redraw.store(false, Ordering::Release);
        show(&shared, number).await?;

        let next = number + if speed > 0.0 { 1 } else { -1 };
        let length = shared.video_length()?;
        if next < 1 || next > length {
            debug!("Playback reached frame {}, pausing", number);
            shared.mode.send_replace(PlaybackMode::Paused);
            continue;
        }
        // Only advance if no seek moved us meanwhile
        let _ = shared
            .position
            .compare_exchange(number, next, Ordering::AcqRel, Ordering::Acquire);

        let delay = shared.frame_delay()?;
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = mode_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Plays a reader at its frame rate, handing each frame to a [`Renderer`].
///
/// The playback loop runs as a tokio task that starts on the first call to
/// [`Player::play`], [`Player::pause`], [`Player::loading`] or [`Player::seek`];
/// those must be called from inside a tokio runtime.
pub struct Player {
    shared: Arc<Shared>,
    task: Option<JoinHandle<Result<()>>>,
}

impl Player {
    pub fn new(reader: Box<dyn Reader>, renderer: Box<dyn Renderer>) -> Self {
        let (mode, _) = watch::channel(PlaybackMode::Stopped);
        Self {
            shared: Arc::new(Shared {
                reader: Mutex::new(reader),
                renderer: Mutex::new(renderer),
                mode,
                position: AtomicI64::new(1),
                speed: AtomicU64::new(1.0f64.to_bits()),
                volume: AtomicU64::new(1.0f64.to_bits()),
                redraw: AtomicBool::new(false),
            }),
            task: None,
        }
    }

    fn ensure_task(&mut self) -> Result<()> {
        if self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false) {
            return Ok(());
        }
        {
            let mut reader = self.shared.reader.lock().map_err(|_| ReelError::generic("reader lock poisoned"))?;
            if !reader.is_open() {
                reader.open()?;
            }
            info!("Player ready: {} ({} frames)", reader.name(), reader.info().video_length);
        }
        self.task = Some(tokio::spawn(run(self.shared.clone())));
        Ok(())
    }

    fn set_mode(&mut self, mode: PlaybackMode) -> Result<()> {
        self.ensure_task()?;
        self.shared.mode.send_replace(mode);
        Ok(())
    }

    pub fn play(&mut self) -> Result<()> {
        debug!("Play at speed {}", self.speed());
        self.set_mode(PlaybackMode::Playing)
    }

    pub fn pause(&mut self) -> Result<()> {
        self.set_mode(PlaybackMode::Paused)
    }

    /// Waiting for data; frames are not advanced
    pub fn loading(&mut self) -> Result<()> {
        self.set_mode(PlaybackMode::Loading)
    }

    /// End playback; the task exits and [`Player::join`] returns
    pub fn stop(&mut self) {
        self.shared.mode.send_replace(PlaybackMode::Stopped);
    }

    /// Jump to frame `number`. While not playing the frame is shown once.
    pub fn seek(&mut self, number: i64) -> Result<()> {
        self.ensure_task()?;
        let length = self.shared.video_length()?;
        let number = number.clamp(1, length);
        debug!("Seek to frame {}", number);

        self.shared.position.store(number, Ordering::Release);
        self.shared.redraw.store(true, Ordering::Release);
        // Wake the loop without changing the mode
        self.shared.mode.send_modify(|_| {});
        Ok(())
    }

    pub fn speed(&self) -> f64 {
        self.shared.speed()
    }

    /// Playback rate multiplier; negative plays in reverse, 0 holds the frame
    pub fn set_speed(&mut self, speed: f64) {
        self.shared.speed.store(speed.to_bits(), Ordering::Relaxed);
        self.shared.mode.send_modify(|_| {});
    }

    pub fn volume(&self) -> f64 {
        self.shared.volume()
    }

    pub fn set_volume(&mut self, volume: f64) {
        self.shared.volume.store(volume.max(0.0).to_bits(), Ordering::Relaxed);
    }

    pub fn mode(&self) -> PlaybackMode {
        *self.shared.mode.borrow()
    }

    /// Frame shown next (or currently held)
    pub fn position(&self) -> i64 {
        self.shared.position.load(Ordering::Acquire)
    }

    /// Resolve once playback is no longer running (paused at an end, stopped, ...)
    pub async fn wait_while_playing(&self) {
        let mut rx = self.shared.mode.subscribe();
        while *rx.borrow_and_update() == PlaybackMode::Playing {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Wait for the playback task to exit after [`Player::stop`]
    pub async fn join(&mut self) -> Result<()> {
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| ReelError::generic(format!("player task failed: {}", e)))?,
            None => Ok(()),
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.shared.mode.send_replace(PlaybackMode::Stopped);
        if let Some(task) = &self.task {
            if !task.is_finished() {
                warn!("Player dropped while running; stopping playback");
            }
        }
    }
}
