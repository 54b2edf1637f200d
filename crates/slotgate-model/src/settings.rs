use std::{str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};
use crate::strategy::{BackoffStrategy, JitterStrategy};

/// Tunables shared by every process that touches the slot store.
///
/// Missing fields fall back to their defaults, so partial configuration files are valid.
/// Parameters are addressable by name (see [`GateSettings::PARAMETERS`]) for operator tooling.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateSettings {
    /// Hard ceiling on concurrent external calls.
    pub max_in_flight: u64,
    /// Hard ceiling on external calls started per calendar minute.
    pub max_rpm: u64,
    /// Jobs admitted per cycle under normal load.
    pub queue_batch_size: u32,
    /// Jobs admitted per cycle under low load.
    pub queue_batch_size_low_load: u32,
    /// Admission pauses once the in-flight counter reaches this value.
    pub queue_max_in_flight_for_admission: u64,
    /// Admission pauses once this many jobs are executing.
    pub queue_max_running_executions: u64,
    /// Failures allowed before a job is dead-lettered.
    pub max_retries: u32,
    pub reconciler_enabled: bool,
    /// Counter excess over tracked records tolerated before a reset.
    pub reconciler_max_drift: u64,
    /// Hard ceiling on a single blocking acquire.
    pub acquire_timeout_ms: u64,
    /// Wait policy while the in-flight counter is full.
    pub acquire_backoff: BackoffStrategy,
    pub rpm_window_ttl_secs: u64,
    pub job_record_ttl_secs: u64,
    /// Unreleased records older than this are swept by the reconciler.
    pub stale_job_secs: u64,
    pub low_load_running_threshold: u64,
    pub low_load_in_flight_threshold: u64,
    pub reconcile_interval_secs: u64,
    pub admission_interval_secs: u64,
    pub settings_cache_ttl_secs: u64,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            max_in_flight: 150,
            max_rpm: 200,
            queue_batch_size: 5,
            queue_batch_size_low_load: 10,
            queue_max_in_flight_for_admission: 10,
            queue_max_running_executions: 50,
            max_retries: 3,
            reconciler_enabled: true,
            reconciler_max_drift: 5,
            acquire_timeout_ms: 15 * 60 * 1_000,
            acquire_backoff: BackoffStrategy::default(),
            rpm_window_ttl_secs: 120,
            job_record_ttl_secs: 3_600,
            stale_job_secs: 7_200,
            low_load_running_threshold: 10,
            low_load_in_flight_threshold: 3,
            reconcile_interval_secs: 300,
            admission_interval_secs: 120,
            settings_cache_ttl_secs: 300,
        }
    }
}

impl GateSettings {
    /// Every parameter name accepted by [`get`](Self::get) and [`set`](Self::set).
    pub const PARAMETERS: &'static [&'static str] = &[
        "max_in_flight",
        "max_rpm",
        "queue_batch_size",
        "queue_batch_size_low_load",
        "queue_max_in_flight_for_admission",
        "queue_max_running_executions",
        "max_retries",
        "reconciler_enabled",
        "reconciler_max_drift",
        "acquire_timeout_ms",
        "acquire_backoff.jitter",
        "acquire_backoff.first_ms",
        "acquire_backoff.max_ms",
        "acquire_backoff.factor",
        "rpm_window_ttl_secs",
        "job_record_ttl_secs",
        "stale_job_secs",
        "low_load_running_threshold",
        "low_load_in_flight_threshold",
        "reconcile_interval_secs",
        "admission_interval_secs",
        "settings_cache_ttl_secs",
    ];

    /// Current value of a parameter, rendered as text.
    pub fn get(&self, name: &str) -> ModelResult<String> {
        let value = match name.trim() {
            "max_in_flight" => self.max_in_flight.to_string(),
            "max_rpm" => self.max_rpm.to_string(),
            "queue_batch_size" => self.queue_batch_size.to_string(),
            "queue_batch_size_low_load" => self.queue_batch_size_low_load.to_string(),
            "queue_max_in_flight_for_admission" => {
                self.queue_max_in_flight_for_admission.to_string()
            }
            "queue_max_running_executions" => self.queue_max_running_executions.to_string(),
            "max_retries" => self.max_retries.to_string(),
            "reconciler_enabled" => self.reconciler_enabled.to_string(),
            "reconciler_max_drift" => self.reconciler_max_drift.to_string(),
            "acquire_timeout_ms" => self.acquire_timeout_ms.to_string(),
            "acquire_backoff.jitter" => self.acquire_backoff.jitter.as_str().to_string(),
            "acquire_backoff.first_ms" => self.acquire_backoff.first_ms.to_string(),
            "acquire_backoff.max_ms" => self.acquire_backoff.max_ms.to_string(),
            "acquire_backoff.factor" => self.acquire_backoff.factor.to_string(),
            "rpm_window_ttl_secs" => self.rpm_window_ttl_secs.to_string(),
            "job_record_ttl_secs" => self.job_record_ttl_secs.to_string(),
            "stale_job_secs" => self.stale_job_secs.to_string(),
            "low_load_running_threshold" => self.low_load_running_threshold.to_string(),
            "low_load_in_flight_threshold" => self.low_load_in_flight_threshold.to_string(),
            "reconcile_interval_secs" => self.reconcile_interval_secs.to_string(),
            "admission_interval_secs" => self.admission_interval_secs.to_string(),
            "settings_cache_ttl_secs" => self.settings_cache_ttl_secs.to_string(),
            other => return Err(ModelError::UnknownParameter(other.to_string())),
        };
        Ok(value)
    }

    /// All parameters with their current values, in [`PARAMETERS`](Self::PARAMETERS) order.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        Self::PARAMETERS
            .iter()
            .filter_map(|name| self.get(name).ok().map(|v| (*name, v)))
            .collect()
    }

    /// Parse and assign a parameter by name.
    ///
    /// The change is validated as a whole; on error `self` is left untouched.
    pub fn set(&mut self, name: &str, value: &str) -> ModelResult<()> {
        let name = name.trim();
        let mut next = self.clone();
        match name {
            "max_in_flight" => next.max_in_flight = parse_num(name, value)?,
            "max_rpm" => next.max_rpm = parse_num(name, value)?,
            "queue_batch_size" => next.queue_batch_size = parse_num(name, value)?,
            "queue_batch_size_low_load" => next.queue_batch_size_low_load = parse_num(name, value)?,
            "queue_max_in_flight_for_admission" => {
                next.queue_max_in_flight_for_admission = parse_num(name, value)?
            }
            "queue_max_running_executions" => {
                next.queue_max_running_executions = parse_num(name, value)?
            }
            "max_retries" => next.max_retries = parse_num(name, value)?,
            "reconciler_enabled" => next.reconciler_enabled = parse_bool(name, value)?,
            "reconciler_max_drift" => next.reconciler_max_drift = parse_num(name, value)?,
            "acquire_timeout_ms" => next.acquire_timeout_ms = parse_num(name, value)?,
            "acquire_backoff.jitter" => {
                next.acquire_backoff.jitter = value.parse::<JitterStrategy>()?
            }
            "acquire_backoff.first_ms" => next.acquire_backoff.first_ms = parse_num(name, value)?,
            "acquire_backoff.max_ms" => next.acquire_backoff.max_ms = parse_num(name, value)?,
            "acquire_backoff.factor" => next.acquire_backoff.factor = parse_num(name, value)?,
            "rpm_window_ttl_secs" => next.rpm_window_ttl_secs = parse_num(name, value)?,
            "job_record_ttl_secs" => next.job_record_ttl_secs = parse_num(name, value)?,
            "stale_job_secs" => next.stale_job_secs = parse_num(name, value)?,
            "low_load_running_threshold" => {
                next.low_load_running_threshold = parse_num(name, value)?
            }
            "low_load_in_flight_threshold" => {
                next.low_load_in_flight_threshold = parse_num(name, value)?
            }
            "reconcile_interval_secs" => next.reconcile_interval_secs = parse_num(name, value)?,
            "admission_interval_secs" => next.admission_interval_secs = parse_num(name, value)?,
            "settings_cache_ttl_secs" => next.settings_cache_ttl_secs = parse_num(name, value)?,
            other => return Err(ModelError::UnknownParameter(other.to_string())),
        }
        next.validate()?;
        *self = next;
        Ok(())
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> ModelResult<()> {
        positive("max_in_flight", self.max_in_flight)?;
        positive("max_rpm", self.max_rpm)?;
        positive("max_retries", u64::from(self.max_retries))?;
        positive("acquire_timeout_ms", self.acquire_timeout_ms)?;
        positive("acquire_backoff.first_ms", self.acquire_backoff.first_ms)?;
        positive("reconcile_interval_secs", self.reconcile_interval_secs)?;
        positive("admission_interval_secs", self.admission_interval_secs)?;
        positive("job_record_ttl_secs", self.job_record_ttl_secs)?;
        positive("stale_job_secs", self.stale_job_secs)?;

        if self.acquire_backoff.max_ms < self.acquire_backoff.first_ms {
            return Err(ModelError::invalid_parameter(
                "acquire_backoff.max_ms",
                self.acquire_backoff.max_ms.to_string(),
                "must be >= acquire_backoff.first_ms",
            ));
        }
        let factor = self.acquire_backoff.factor;
        if !factor.is_finite() || factor < 1.0 {
            return Err(ModelError::invalid_parameter(
                "acquire_backoff.factor",
                factor.to_string(),
                "must be a finite number >= 1",
            ));
        }
        // A window record must outlive its own minute.
        if self.rpm_window_ttl_secs < 60 {
            return Err(ModelError::invalid_parameter(
                "rpm_window_ttl_secs",
                self.rpm_window_ttl_secs.to_string(),
                "must be >= 60",
            ));
        }
        Ok(())
    }

    /// Whether a job record can outlive `stale_job_secs` and be caught by the stale sweep.
    ///
    /// With `stale_job_secs >= job_record_ttl_secs` records expire first, and crashed calls are
    /// only repaired through the counter reset.
    pub fn stale_sweep_effective(&self) -> bool {
        self.stale_job_secs < self.job_record_ttl_secs
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn admission_interval(&self) -> Duration {
        Duration::from_secs(self.admission_interval_secs)
    }

    pub fn settings_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.settings_cache_ttl_secs)
    }

    pub fn job_record_ttl(&self) -> time::Duration {
        time::Duration::seconds(secs_i64(self.job_record_ttl_secs))
    }

    pub fn rpm_window_ttl(&self) -> time::Duration {
        time::Duration::seconds(secs_i64(self.rpm_window_ttl_secs))
    }

    pub fn stale_job_age(&self) -> time::Duration {
        time::Duration::seconds(secs_i64(self.stale_job_secs))
    }
}

fn secs_i64(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX)
}

fn positive(name: &str, value: u64) -> ModelResult<()> {
    if value == 0 {
        return Err(ModelError::invalid_parameter(name, "0", "must be > 0"));
    }
    Ok(())
}

fn parse_num<T>(name: &str, value: &str) -> ModelResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| ModelError::invalid_parameter(name, value, e.to_string()))
}

fn parse_bool(name: &str, value: &str) -> ModelResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ModelError::invalid_parameter(name, value, "expected a boolean")),
    }
}
