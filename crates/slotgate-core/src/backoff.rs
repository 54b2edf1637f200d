//! Jittered delays for capacity waits.
use std::time::Duration;

use rand::Rng;
use slotgate_model::{BackoffStrategy, JitterStrategy};

/// Delay before retry number `attempt`, with the strategy's jitter applied.
///
/// `prev` is the previously slept delay; only decorrelated jitter looks at it.
pub fn jittered_delay(strategy: &BackoffStrategy, attempt: u32, prev: Option<Duration>) -> Duration {
    let base = strategy.base_delay(attempt);
    let mut rng = rand::rng();
    match strategy.jitter {
        JitterStrategy::None => base,
        JitterStrategy::Full => random_between(&mut rng, Duration::ZERO, base),
        JitterStrategy::Equal => {
            let half = base / 2;
            random_between(&mut rng, half, base)
        }
        JitterStrategy::Decorrelated => {
            let first = strategy.first();
            let upper = prev
                .unwrap_or(first)
                .saturating_mul(3)
                .min(strategy.max())
                .max(first);
            random_between(&mut rng, first, upper)
        }
    }
}

/// Small random offset added after a minute rollover so waiters do not stampede.
pub fn rollover_jitter(max: Duration) -> Duration {
    random_between(&mut rand::rng(), Duration::ZERO, max)
}

fn random_between<R: Rng>(rng: &mut R, lo: Duration, hi: Duration) -> Duration {
    if hi <= lo {
        return lo;
    }
    let lo_ms = lo.as_millis() as u64;
    let hi_ms = hi.as_millis() as u64;
    Duration::from_millis(rng.random_range(lo_ms..=hi_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy(jitter: JitterStrategy) -> BackoffStrategy {
        BackoffStrategy {
            jitter,
            ..BackoffStrategy::default()
        }
    }

    #[test]
    fn no_jitter_is_exact() {
        let s = strategy(JitterStrategy::None);
        assert_eq!(jittered_delay(&s, 2, None), Duration::from_millis(1_000));
    }

    #[test]
    fn full_jitter_stays_within_base() {
        let s = strategy(JitterStrategy::Full);
        for attempt in 0..8 {
            let d = jittered_delay(&s, attempt, None);
            assert!(d <= s.base_delay(attempt));
        }
    }

    #[test]
    fn equal_jitter_keeps_lower_half() {
        let s = strategy(JitterStrategy::Equal);
        for _ in 0..100 {
            let d = jittered_delay(&s, 3, None);
            assert!(d >= Duration::from_millis(1_000) && d <= Duration::from_millis(2_000));
        }
    }

    #[test]
    fn decorrelated_is_bounded_by_max() {
        let s = strategy(JitterStrategy::Decorrelated);
        let mut prev = None;
        for attempt in 0..20 {
            let d = jittered_delay(&s, attempt, prev);
            assert!(d >= s.first() && d <= s.max());
            prev = Some(d);
        }
    }

    #[test]
    fn rollover_jitter_is_bounded() {
        for _ in 0..100 {
            assert!(rollover_jitter(Duration::from_millis(500)) <= Duration::from_millis(500));
        }
        assert_eq!(rollover_jitter(Duration::ZERO), Duration::ZERO);
    }
}
