use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tracing::debug;

use crate::core::Frame;

/// Frames always kept regardless of the byte budget
const DEFAULT_MIN_FRAMES: usize = 20;

/// Least-recently-added cache of frames keyed by frame number, bounded by
/// a byte budget
#[derive(Debug, Clone)]
pub struct FrameCache {
    frames: HashMap<i64, Arc<Frame>>,
    /// Most recent first
    order: VecDeque<i64>,
    max_bytes: u64,
    min_frames: usize,
    total_bytes: u64,
}

impl Default for FrameCache {
    fn default() -> Self {
        Self::new(0)
    }
}

impl FrameCache {
    /// `max_bytes` of 0 means unlimited
    pub fn new(max_bytes: u64) -> Self {
        Self {
            frames: HashMap::new(),
            order: VecDeque::new(),
            max_bytes,
            min_frames: DEFAULT_MIN_FRAMES,
            total_bytes: 0,
        }
    }

    /// Override how many frames survive eviction
    pub fn with_min_frames(mut self, min_frames: usize) -> Self {
        self.min_frames = min_frames;
        self
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn set_max_bytes(&mut self, max_bytes: u64) {
        self.max_bytes = max_bytes;
        self.clean_up();
    }

    /// Insert a frame; an existing entry is refreshed and moved to the front
    pub fn add(&mut self, frame: Arc<Frame>) {
        let number = frame.number;
        let bytes = frame.get_bytes();

        if let Some(old) = self.frames.insert(number, frame) {
            self.total_bytes -= old.get_bytes();
            self.order.retain(|n| *n != number);
        }
        self.total_bytes += bytes;
        self.order.push_front(number);

        self.clean_up();
    }

    pub fn get(&self, number: i64) -> Option<Arc<Frame>> {
        self.frames.get(&number).cloned()
    }

    pub fn contains(&self, number: i64) -> bool {
        self.frames.contains_key(&number)
    }

    pub fn remove(&mut self, number: i64) {
        self.remove_range(number, number);
    }

    /// Remove every frame in `start..=end`
    pub fn remove_range(&mut self, start: i64, end: i64) {
        let doomed: Vec<i64> = self.frames.keys().copied().filter(|n| (start..=end).contains(n)).collect();
        for number in doomed {
            if let Some(frame) = self.frames.remove(&number) {
                self.total_bytes -= frame.get_bytes();
            }
        }
        self.order.retain(|n| !(start..=end).contains(n));
    }

    pub fn clear(&mut self) {
        self.frames.clear();
        self.order.clear();
        self.total_bytes = 0;
    }

    pub fn count(&self) -> usize {
        self.frames.len()
    }

    pub fn bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Frame with the lowest number
    pub fn smallest(&self) -> Option<Arc<Frame>> {
        self.frames.keys().min().and_then(|n| self.get(*n))
    }

    /// Contiguous runs of cached frame numbers as inclusive `(start, end)` pairs
    pub fn ranges(&self) -> Vec<(i64, i64)> {
        let mut numbers: Vec<i64> = self.frames.keys().copied().collect();
        numbers.sort_unstable();

        let mut ranges: Vec<(i64, i64)> = Vec::new();
        for n in numbers {
            match ranges.last_mut() {
                Some((_, end)) if *end + 1 == n => *end = n,
                _ => ranges.push((n, n)),
            }
        }
        ranges
    }

    fn clean_up(&mut self) {
        if self.max_bytes == 0 {
            return;
        }

        while self.total_bytes > self.max_bytes && self.order.len() > self.min_frames {
            let Some(oldest) = self.order.pop_back() else { break };
            if let Some(frame) = self.frames.remove(&oldest) {
                self.total_bytes -= frame.get_bytes();
                debug!("Evicted frame {} from cache ({} bytes held)", oldest, self.total_bytes);
            }
        }
    }
}
