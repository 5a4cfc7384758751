//! Exponential backoff with jitter.
//!
//! Intended for clients of this server that reconnect after a dropped
//! WebSocket: each `duration()` call grows the delay by `factor`, applies
//! the configured jitter and clamps to `max`.

use parking_lot::Mutex;
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct BackoffOptions {
    pub min: Duration,
    pub max: Duration,
    /// Growth factor applied per attempt. Values at or below 1 fall back
    /// to the default of 2.
    pub factor: f64,
    /// Jitter fraction in (0, 1]. Zero disables jitter.
    pub jitter: f64,
}

impl Default for BackoffOptions {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(100),
            max: Duration::from_millis(10_000),
            factor: 2.0,
            jitter: 0.0,
        }
    }
}

#[derive(Debug)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    factor: f64,
    jitter: f64,
    attempts: Mutex<u32>,
}

impl Backoff {
    pub fn new(opts: BackoffOptions) -> Self {
        let defaults = BackoffOptions::default();

        let min = if opts.min > Duration::ZERO {
            opts.min
        } else {
            defaults.min
        };
        let max = if opts.max > Duration::ZERO {
            opts.max.max(min)
        } else {
            defaults.max.max(min)
        };
        let factor = if opts.factor > 1.0 {
            opts.factor
        } else {
            defaults.factor
        };
        let jitter = if opts.jitter > 0.0 && opts.jitter <= 1.0 {
            opts.jitter
        } else {
            0.0
        };

        Self {
            min,
            max,
            factor,
            jitter,
            attempts: Mutex::new(0),
        }
    }

    /// Number of delays handed out since the last reset.
    pub fn attempts(&self) -> u32 {
        *self.attempts.lock()
    }

    /// Next delay: `min * factor^attempts`, jittered, clamped to `max`.
    pub fn duration(&self) -> Duration {
        let mut attempts = self.attempts.lock();
        *attempts += 1;

        let mut ms = self.min.as_millis() as f64 * self.factor.powi(*attempts as i32);

        if self.jitter > 0.0 {
            let mut rng = rand::thread_rng();
            let deviation = (rng.gen::<f64>() * self.jitter * ms).floor();
            if rng.gen_bool(0.5) {
                ms += deviation;
            } else {
                ms -= deviation;
            }
        }

        Duration::from_millis(ms.min(self.max.as_millis() as f64).max(0.0) as u64)
    }

    /// Starts the schedule over.
    pub fn reset(&self) {
        *self.attempts.lock() = 0;
    }
}
