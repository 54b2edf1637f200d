//! Well-known record identifiers in the slot store.

/// Id of the singleton in-flight counter record.
pub const IN_FLIGHT_COUNTER_ID: &str = "in_flight";

/// Prefix of per-minute RPM window records (`rpm_window_YYYYMMDD_HHMM`).
pub const RPM_WINDOW_PREFIX: &str = "rpm_window_";

/// Prefix of per-call in-flight job records (`job_<uuid>`).
pub const JOB_RECORD_PREFIX: &str = "job_";

/// Id of the singleton global backoff record.
pub const GLOBAL_BACKOFF_ID: &str = "global_backoff";
