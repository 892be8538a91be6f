//! Frame counting and timing utilities

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// FPS statistics for a time window
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct FpsWindow {
    pub avg: f32,
    pub min: f32,
    pub max: f32,
}

/// Rolling frame statistics
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct FrameStats {
    pub one_sec: FpsWindow,
    pub five_sec: FpsWindow,
    pub current_fps: f32,
    pub frame_id: u64,
}

/// Monotonic frame counter with rolling timing statistics
///
/// The render thread advances the clock once per frame. Any thread may read
/// the current frame id; release stamping and deferred reclamation are keyed
/// off this counter, so it must never go backwards.
pub struct FrameClock {
    frame: AtomicU64,
    timing: Mutex<TimingState>,
}

struct TimingState {
    last_frame: Instant,
    delta: Duration,
    fps_timer: Instant,
    fps: f32,
    fps_frame_count: u32,
    /// Ring buffer of (timestamp, frame_time_secs) for rolling stats
    frame_history: VecDeque<(Instant, f32)>,
}

impl FrameClock {
    /// Create a clock at frame 0 (no frame completed yet)
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            frame: AtomicU64::new(0),
            timing: Mutex::new(TimingState {
                last_frame: now,
                delta: Duration::ZERO,
                fps_timer: now,
                fps: 0.0,
                fps_frame_count: 0,
                frame_history: VecDeque::new(),
            }),
        }
    }

    /// Advance to the next frame, returning the new frame id
    ///
    /// Call once per frame from the render thread.
    pub fn advance(&self) -> u64 {
        let frame = self.frame.fetch_add(1, Ordering::AcqRel) + 1;
        let mut timing = self.timing.lock().unwrap();
        timing.tick(Instant::now());
        frame
    }

    /// Current frame id; 0 until the first `advance`
    pub fn current(&self) -> u64 {
        self.frame.load(Ordering::Acquire)
    }

    /// Time between the two most recent `advance` calls, in seconds
    pub fn delta_secs(&self) -> f32 {
        self.timing.lock().unwrap().delta.as_secs_f32()
    }

    /// Rolling FPS statistics over 1s and 5s windows
    pub fn stats(&self) -> FrameStats {
        let timing = self.timing.lock().unwrap();
        let now = Instant::now();
        FrameStats {
            one_sec: timing.window_stats(now, Duration::from_secs(1)),
            five_sec: timing.window_stats(now, Duration::from_secs(5)),
            current_fps: timing.fps,
            frame_id: self.frame.load(Ordering::Acquire),
        }
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimingState {
    fn tick(&mut self, now: Instant) {
        self.delta = now - self.last_frame;
        self.last_frame = now;
        self.fps_frame_count += 1;

        self.frame_history.push_back((now, self.delta.as_secs_f32()));

        // Prune frames older than the largest stats window
        let cutoff = now - Duration::from_secs(5);
        while let Some(&(timestamp, _)) = self.frame_history.front() {
            if timestamp < cutoff {
                self.frame_history.pop_front();
            } else {
                break;
            }
        }

        // Update FPS every second
        let fps_elapsed = now - self.fps_timer;
        if fps_elapsed >= Duration::from_secs(1) {
            self.fps = self.fps_frame_count as f32 / fps_elapsed.as_secs_f32();
            self.fps_frame_count = 0;
            self.fps_timer = now;
        }
    }

    fn window_stats(&self, now: Instant, window: Duration) -> FpsWindow {
        let cutoff = now - window;

        let mut frame_count = 0;
        let mut total_time = 0.0f32;
        let mut min_fps = f32::INFINITY;
        let mut max_fps = 0.0f32;

        for &(timestamp, frame_time) in self.frame_history.iter() {
            if timestamp >= cutoff {
                frame_count += 1;
                total_time += frame_time;

                let fps = if frame_time > 0.0 { 1.0 / frame_time } else { 0.0 };
                min_fps = min_fps.min(fps);
                max_fps = max_fps.max(fps);
            }
        }

        let avg = if total_time > 0.0 {
            frame_count as f32 / total_time
        } else {
            0.0
        };

        if frame_count == 0 {
            min_fps = 0.0;
            max_fps = 0.0;
        }

        FpsWindow {
            avg,
            min: min_fps,
            max: max_fps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_clock_starts_at_zero() {
        let clock = FrameClock::new();
        assert_eq!(clock.current(), 0);
    }

    #[test]
    fn test_advance_is_monotonic() {
        let clock = FrameClock::new();
        assert_eq!(clock.advance(), 1);
        assert_eq!(clock.advance(), 2);
        assert_eq!(clock.advance(), 3);
        assert_eq!(clock.current(), 3);
    }

    #[test]
    fn test_current_visible_across_threads() {
        let clock = Arc::new(FrameClock::new());
        for _ in 0..5 {
            clock.advance();
        }

        let reader = Arc::clone(&clock);
        let handle = std::thread::spawn(move || reader.current());
        assert_eq!(handle.join().unwrap(), 5);
    }

    #[test]
    fn test_stats_track_frame_id() {
        let clock = FrameClock::new();
        clock.advance();
        clock.advance();
        let stats = clock.stats();
        assert_eq!(stats.frame_id, 2);
        assert!(stats.one_sec.min <= stats.one_sec.max);
    }
}
