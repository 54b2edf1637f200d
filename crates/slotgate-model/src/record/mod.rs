//! Records persisted in the shared slot store.
//!
//! Field names are part of the interoperability contract: every process that
//! touches the store (workers, reconciler, admission, operator tooling) reads
//! and writes exactly these shapes.
mod constants;
pub use constants::{GLOBAL_BACKOFF_ID, IN_FLIGHT_COUNTER_ID, JOB_RECORD_PREFIX, RPM_WINDOW_PREFIX};

mod counter;
pub use counter::InFlightCounter;

mod window;
pub use window::{MinuteKey, RpmWindow};

mod job;
pub use job::{InFlightJobRecord, JobToken};

mod backoff;
pub use backoff::GlobalBackoff;
