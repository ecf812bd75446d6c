// src/effects/smoothing.rs

/// A control value that approaches its target exponentially, one sample at a
/// time: `v(n) = target + (v0 - target) * e^(-n / (tau * sr))`.
#[derive(Debug, Clone, Copy)]
pub struct SmoothedParam {
    current: f32,
    target: f32,
    coeff: f32,
}

/// Below this distance the value snaps onto the target (denormal guard).
const SETTLE_EPSILON: f32 = 1e-6;

impl SmoothedParam {
    pub fn new(value: f32, time_constant: f64, sample_rate: u32) -> Self {
        let samples = (time_constant * sample_rate as f64).max(f64::MIN_POSITIVE);
        Self {
            current: value,
            target: value,
            coeff: (-1.0 / samples).exp() as f32,
        }
    }

    /// Moves the target only; the value itself keeps its position.
    pub fn set_target(&mut self, target: f32) {
        self.target = target;
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn current(&self) -> f32 {
        self.current
    }

    pub fn is_settled(&self) -> bool {
        self.current == self.target
    }

    /// Advances one sample and returns the new value.
    #[inline]
    pub fn next(&mut self) -> f32 {
        if self.current != self.target {
            self.current = self.target + (self.current - self.target) * self.coeff;
            if (self.current - self.target).abs() < SETTLE_EPSILON {
                self.current = self.target;
            }
        }
        self.current
    }

    /// Advances `samples` at once; same result as calling `next` that often.
    pub fn advance(&mut self, samples: usize) -> f32 {
        if self.current != self.target {
            let decay = self.coeff.powi(samples.min(i32::MAX as usize) as i32);
            self.current = self.target + (self.current - self.target) * decay;
            if (self.current - self.target).abs() < SETTLE_EPSILON {
                self.current = self.target;
            }
        }
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn target_change_does_not_move_value() {
        let mut p = SmoothedParam::new(1.0, 0.1, 48_000);
        p.set_target(0.0);
        assert_eq!(p.current(), 1.0);
        // First step is tiny, not a jump.
        let first = p.next();
        assert!(first < 1.0 && first > 0.999);
    }

    #[test]
    fn one_time_constant_covers_63_percent() {
        let sr = 8_000;
        let mut p = SmoothedParam::new(0.0, 0.1, sr);
        p.set_target(1.0);
        for _ in 0..800 {
            p.next();
        }
        assert_abs_diff_eq!(p.current(), 1.0 - (-1.0f32).exp(), epsilon = 1e-4);
    }

    #[test]
    fn advance_matches_stepping() {
        let mut a = SmoothedParam::new(2.0, 0.1, 44_100);
        let mut b = a;
        a.set_target(-3.0);
        b.set_target(-3.0);
        for _ in 0..257 {
            a.next();
        }
        b.advance(257);
        assert_abs_diff_eq!(a.current(), b.current(), epsilon = 1e-4);
    }

    #[test]
    fn approach_is_monotonic_and_settles() {
        let mut p = SmoothedParam::new(0.0, 0.1, 1_000);
        p.set_target(1.0);
        let mut last = 0.0;
        for _ in 0..5_000 {
            let v = p.next();
            assert!(v >= last);
            last = v;
        }
        assert!(p.is_settled());
    }
}
