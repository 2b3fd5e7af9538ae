use std::time::{Duration, Instant};

/// Maximum animation step per frame, so a long stall does not make the scene jump.
pub const DEFAULT_MAX_ANIMATION_TIME_DELTA: f64 = 1.0 / 60.0;

/// Wall clock delta between frames.
pub struct Time {
    delta: Duration,
    last_update: Instant,
}

impl Time {
    pub fn new() -> Time {
        Time {
            delta: Duration::from_secs(0),
            last_update: Instant::now(),
        }
    }

    pub fn delta(&self) -> Duration {
        self.delta
    }

    pub fn update(&mut self) {
        let now = Instant::now();
        self.delta = now - self.last_update;
        self.last_update = now;
    }
}

impl Default for Time {
    fn default() -> Self {
        Self::new()
    }
}

/// Animation time, advanced by clamped frame deltas while animation is enabled.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimationClock {
    time: f32,
    max_delta: f64,
}

impl AnimationClock {
    pub fn new(max_delta: f64) -> Self {
        Self {
            time: 0.0,
            max_delta,
        }
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn advance(&mut self, elapsed_seconds: f64, animate: bool) {
        if animate {
            let max_delta = self.max_delta.max(0.0);
            self.time += elapsed_seconds.max(0.0).min(max_delta) as f32;
        }
    }
}

impl Default for AnimationClock {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ANIMATION_TIME_DELTA)
    }
}
