use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::JitterStrategy;

/// Exponential wait between in-flight capacity checks.
///
/// `base_delay(n) = min(max_ms, first_ms * factor^n)`; jitter is applied on top by the caller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct BackoffStrategy {
    pub jitter: JitterStrategy,
    pub first_ms: u64,
    pub max_ms: u64,
    pub factor: f64,
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self {
            jitter: JitterStrategy::Full,
            first_ms: 250,
            max_ms: 5_000,
            factor: 2.0,
        }
    }
}

impl BackoffStrategy {
    /// Un-jittered delay before retry number `attempt` (0-based).
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.min(i32::MAX as u32) as i32;
        let raw = self.first_ms as f64 * self.factor.max(1.0).powi(exp);
        let capped = if raw.is_finite() {
            raw.min(self.max_ms as f64)
        } else {
            self.max_ms as f64
        };
        Duration::from_millis(capped.round() as u64)
    }

    pub fn first(&self) -> Duration {
        Duration::from_millis(self.first_ms)
    }

    pub fn max(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_doubles_from_250ms_up_to_5s() {
        let b = BackoffStrategy::default();
        assert_eq!(b.base_delay(0), Duration::from_millis(250));
        assert_eq!(b.base_delay(1), Duration::from_millis(500));
        assert_eq!(b.base_delay(4), Duration::from_millis(4_000));
        assert_eq!(b.base_delay(5), Duration::from_millis(5_000));
        assert_eq!(b.base_delay(500), Duration::from_millis(5_000));
    }

    #[test]
    fn factor_below_one_is_treated_as_constant() {
        let b = BackoffStrategy {
            factor: 0.5,
            ..BackoffStrategy::default()
        };
        assert_eq!(b.base_delay(3), Duration::from_millis(250));
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let b: BackoffStrategy = serde_json::from_str(r#"{"jitter":"equal"}"#).unwrap();
        assert_eq!(b.jitter, JitterStrategy::Equal);
        assert_eq!(b.first_ms, 250);
        assert_eq!(b.max_ms, 5_000);
    }
}
