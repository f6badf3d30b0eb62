//! Time-based token bucket, used to pace outbound IRC lines so the bot
//! never floods itself off the server.

use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct TokenBucket {
    capacity: f64,
    /// Tokens added per second.
    refill_rate: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take `needed` tokens if available. Never blocks.
    pub fn allow(&self, needed: f64) -> bool {
        self.allow_at(needed, Instant::now())
    }

    fn allow_at(&self, needed: f64, now: Instant) -> bool {
        let mut state = self.state.lock().unwrap();

        let elapsed = now.saturating_duration_since(state.last_refill);
        state.tokens = (state.tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.capacity);
        state.last_refill = now;

        if state.tokens >= needed {
            state.tokens -= needed;
            true
        } else {
            false
        }
    }

    /// Wait until one token is available, then take it.
    pub async fn throttle(&self) {
        while !self.allow(1.0) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_up_to_capacity_then_denied() {
        let bucket = TokenBucket::new(3.0, 1.0);
        let now = Instant::now();

        assert!(bucket.allow_at(1.0, now));
        assert!(bucket.allow_at(1.0, now));
        assert!(bucket.allow_at(1.0, now));
        assert!(!bucket.allow_at(1.0, now));
    }

    #[test]
    fn refills_over_time() {
        let bucket = TokenBucket::new(2.0, 2.0);
        let start = Instant::now();

        assert!(bucket.allow_at(2.0, start));
        assert!(!bucket.allow_at(1.0, start));

        // Half a second at 2 tokens/s refills one token.
        assert!(bucket.allow_at(1.0, start + Duration::from_millis(500)));
        assert!(!bucket.allow_at(1.0, start + Duration::from_millis(500)));
    }

    #[test]
    fn refill_caps_at_capacity() {
        let bucket = TokenBucket::new(2.0, 10.0);
        let start = Instant::now();

        assert!(bucket.allow_at(1.0, start));

        // A long idle period must not accumulate more than capacity.
        let later = start + Duration::from_secs(60);
        assert!(bucket.allow_at(2.0, later));
        assert!(!bucket.allow_at(1.0, later));
    }
}
