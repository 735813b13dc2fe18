//! Frame timing.

use std::time::{Duration, Instant};

/// Averaged frame timing over one reporting window.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameStats {
    pub frames: u32,
    pub average_frame_time: Duration,
}

impl FrameStats {
    /// Frames per second implied by the average frame time.
    pub fn fps(&self) -> f64 {
        let secs = self.average_frame_time.as_secs_f64();
        if secs > 0.0 { 1.0 / secs } else { 0.0 }
    }
}

/// Measures per-frame deltas and produces periodic [`FrameStats`].
#[derive(Debug)]
pub struct FrameTimer {
    start: Instant,
    last_tick: Instant,
    window_start: Instant,
    window_frames: u32,
    report_interval: Duration,
}

impl FrameTimer {
    /// Create a timer that reports once per `report_interval`.
    pub fn new(report_interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
            window_start: now,
            window_frames: 0,
            report_interval,
        }
    }

    /// Total time since the timer was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Marks the end of a frame and returns the time since the previous one.
    pub fn tick(&mut self) -> Duration {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> Duration {
        let delta = now.saturating_duration_since(self.last_tick);
        self.last_tick = now;
        self.window_frames += 1;
        delta
    }

    /// Returns stats for the current window once it is older than the
    /// report interval, then starts a new window.
    pub fn take_report(&mut self) -> Option<FrameStats> {
        self.take_report_at(Instant::now())
    }

    fn take_report_at(&mut self, now: Instant) -> Option<FrameStats> {
        let window = now.saturating_duration_since(self.window_start);
        if window < self.report_interval || self.window_frames == 0 {
            return None;
        }

        let stats = FrameStats {
            frames: self.window_frames,
            average_frame_time: window / self.window_frames,
        };
        self.window_start = now;
        self.window_frames = 0;
        Some(stats)
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_report_before_interval() {
        let mut timer = FrameTimer::new(Duration::from_secs(1));
        let t0 = timer.window_start;
        timer.tick_at(t0 + Duration::from_millis(16));
        assert!(timer.take_report_at(t0 + Duration::from_millis(500)).is_none());
    }

    #[test]
    fn test_report_averages_window() {
        let mut timer = FrameTimer::new(Duration::from_secs(1));
        let t0 = timer.window_start;
        for i in 1..=4 {
            timer.tick_at(t0 + Duration::from_millis(250 * i));
        }

        let stats = timer
            .take_report_at(t0 + Duration::from_secs(1))
            .expect("window elapsed");
        assert_eq!(stats.frames, 4);
        assert_eq!(stats.average_frame_time, Duration::from_millis(250));
        assert!((stats.fps() - 4.0).abs() < 1e-9);

        // A new window starts empty
        assert!(timer.take_report_at(t0 + Duration::from_secs(3)).is_none());
    }

    #[test]
    fn test_tick_returns_delta() {
        let mut timer = FrameTimer::default();
        let t0 = timer.last_tick;
        assert_eq!(
            timer.tick_at(t0 + Duration::from_millis(20)),
            Duration::from_millis(20)
        );
    }
}
