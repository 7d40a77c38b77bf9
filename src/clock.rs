use chrono::{DateTime, Duration, Utc};

use rand::Rng;

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Source of randomized send-time offsets
pub trait JitterSource: Send + Sync {
    /// An offset in `[0, max]`
    fn jitter(&self, max: Duration) -> Duration;
}

/// Uniformly distributed jitter with second granularity
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn jitter(&self, max: Duration) -> Duration {
        let max_secs = max.num_seconds();
        if max_secs <= 0 {
            return Duration::zero();
        }
        Duration::seconds(rand::thread_rng().gen_range(0..=max_secs))
    }
}

/// A clock stuck at a single instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Always the same offset, clamped to the requested maximum
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub Duration);

impl JitterSource for FixedJitter {
    fn jitter(&self, max: Duration) -> Duration {
        self.0.min(max).max(Duration::zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_jitter_stays_in_bounds() {
        let max = Duration::minutes(60);
        for _ in 0..500 {
            let jitter = RandomJitter.jitter(max);
            assert!(jitter >= Duration::zero());
            assert!(jitter <= max);
        }
    }

    #[test]
    fn random_jitter_with_empty_window_is_zero() {
        assert_eq!(Duration::zero(), RandomJitter.jitter(Duration::zero()));
        assert_eq!(Duration::zero(), RandomJitter.jitter(Duration::seconds(-5)));
    }

    #[test]
    fn fixed_jitter_is_clamped() {
        let jitter = FixedJitter(Duration::minutes(90));
        assert_eq!(Duration::minutes(60), jitter.jitter(Duration::minutes(60)));
        assert_eq!(Duration::minutes(90), jitter.jitter(Duration::hours(2)));
    }
}
