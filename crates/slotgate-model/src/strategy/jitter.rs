use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{ModelError, ModelResult};

/// Controls how random jitter is applied to capacity-wait delays.
///
/// Many workers hitting a full in-flight counter at the same moment would otherwise
/// retry in lockstep. Jitter spreads those retries over time.
///
/// Strategies:
/// - `None`: No jitter. Delays are deterministic.
/// - `Full`: picks a random delay in `[0, base]`.
/// - `Equal`: picks a delay in `[base/2, base]`.
/// - `Decorrelated`: picks a delay in `[first, min(max, prev * 3)]`.
///
/// The math lives in the core backoff module; this enum only names the policy.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    None,
    #[default]
    Full,
    Equal,
    Decorrelated,
}

impl JitterStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            JitterStrategy::None => "none",
            JitterStrategy::Full => "full",
            JitterStrategy::Equal => "equal",
            JitterStrategy::Decorrelated => "decorrelated",
        }
    }
}

impl FromStr for JitterStrategy {
    type Err = ModelError;
    fn from_str(s: &str) -> ModelResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "equal" => Ok(JitterStrategy::Equal),
            "" | "none" => Ok(JitterStrategy::None),
            "full" | "default" => Ok(JitterStrategy::Full),
            "decorrelated" => Ok(JitterStrategy::Decorrelated),
            other => Err(ModelError::UnknownJitter(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!(" Equal ".parse::<JitterStrategy>().unwrap(), JitterStrategy::Equal);
        assert_eq!("".parse::<JitterStrategy>().unwrap(), JitterStrategy::None);
        assert_eq!("default".parse::<JitterStrategy>().unwrap(), JitterStrategy::Full);
    }

    #[test]
    fn rejects_unknown() {
        let err = "wobbly".parse::<JitterStrategy>().unwrap_err();
        assert!(matches!(err, ModelError::UnknownJitter(s) if s == "wobbly"));
    }

    #[test]
    fn as_str_parses_back() {
        for j in [
            JitterStrategy::None,
            JitterStrategy::Full,
            JitterStrategy::Equal,
            JitterStrategy::Decorrelated,
        ] {
            assert_eq!(j.as_str().parse::<JitterStrategy>().unwrap(), j);
        }
    }
}
