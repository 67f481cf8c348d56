use rand::Rng;
use std::time::Duration;

/// Largest base delay a policy accepts; larger bases are lowered to this.
pub const MAX_BASE_SECONDS: f64 = 86_400.0;

/// Exponential backoff with proportional jitter.
///
/// `delay(n) = min(max, base * 2^n) + uniform(0, jitter_ratio * that)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter_ratio: f64,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter_ratio: f64) -> Self {
        Self {
            base,
            max: max.max(base),
            jitter_ratio: jitter_ratio.max(0.0),
        }
    }

    /// Policy of the session layer: at least 1s base, capped at `max(30s, 6 * base)`.
    pub fn for_session(base_seconds: f64) -> Self {
        let base = clamp_base(base_seconds);
        Self::new(
            Duration::from_secs_f64(base),
            Duration::from_secs_f64((base * 6.0).max(30.0)),
            0.25,
        )
    }

    /// Policy of the fetch layer: at least 1s base, capped at `max(8 * base, 60s)`.
    pub fn for_fetch(base_seconds: f64) -> Self {
        let base = clamp_base(base_seconds);
        Self::new(
            Duration::from_secs_f64(base),
            Duration::from_secs_f64((base * 8.0).max(60.0)),
            0.3,
        )
    }

    pub fn max_delay(&self) -> Duration {
        self.max
    }

    /// Delay before jitter for the given exponent
    pub fn raw_delay(&self, exponent: u32) -> Duration {
        let factor = 2f64.powi(exponent.min(62) as i32);
        let scaled = self.base.as_secs_f64() * factor;
        Duration::from_secs_f64(scaled.min(self.max.as_secs_f64()))
    }

    pub fn delay_with<R: Rng + ?Sized>(&self, exponent: u32, rng: &mut R) -> Duration {
        let raw = self.raw_delay(exponent);
        let spread = raw.as_secs_f64() * self.jitter_ratio;
        if spread <= 0.0 {
            return raw;
        }
        raw + Duration::from_secs_f64(rng.gen_range(0.0..spread))
    }

    pub fn delay(&self, exponent: u32) -> Duration {
        self.delay_with(exponent, &mut rand::thread_rng())
    }

    /// Upper bound of `delay(exponent)`
    pub fn ceiling(&self, exponent: u32) -> Duration {
        self.raw_delay(exponent).mul_f64(1.0 + self.jitter_ratio)
    }
}

fn clamp_base(base_seconds: f64) -> f64 {
    if base_seconds.is_finite() {
        base_seconds.clamp(1.0, MAX_BASE_SECONDS)
    } else {
        1.0
    }
}
