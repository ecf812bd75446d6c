// src/engine/clock.rs

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Monotonic engine time in seconds. Every transport reads the same clock.
pub trait EngineClock: Send + Sync {
    fn now(&self) -> f64;

    /// Leaves the suspended state. Idempotent.
    fn resume(&self);

    fn is_suspended(&self) -> bool;
}

/// Clock driven by the output device: the audio callback advances it by the
/// number of frames it rendered, so engine time is sample time.
pub struct SampleClock {
    frames: AtomicU64,
    sample_rate: u32,
    suspended: AtomicBool,
}

impl SampleClock {
    /// Starts suspended; nothing renders until `resume`.
    pub fn new(sample_rate: u32) -> Arc<Self> {
        Arc::new(Self {
            frames: AtomicU64::new(0),
            sample_rate: sample_rate.max(1),
            suspended: AtomicBool::new(true),
        })
    }

    pub fn advance(&self, frames: usize) {
        self.frames.fetch_add(frames as u64, Ordering::Release);
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl EngineClock for SampleClock {
    fn now(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    fn resume(&self) {
        self.suspended.store(false, Ordering::Release);
    }

    fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }
}

/// Host-driven clock. Time only moves when told to.
#[derive(Default)]
pub struct ManualClock {
    seconds: AtomicU64,
    suspended: AtomicBool,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Starts in the suspended state, like a freshly created device clock.
    pub fn suspended() -> Arc<Self> {
        let clock = Self::default();
        clock.suspended.store(true, Ordering::Release);
        Arc::new(clock)
    }

    pub fn set(&self, seconds: f64) {
        self.seconds.store(seconds.to_bits(), Ordering::Release);
    }

    pub fn advance(&self, seconds: f64) {
        self.set(self.now() + seconds);
    }
}

impl EngineClock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.seconds.load(Ordering::Acquire))
    }

    fn resume(&self) {
        self.suspended.store(false, Ordering::Release);
    }

    fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }
}
