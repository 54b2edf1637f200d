mod error;
pub use error::{ModelError, ModelResult};

mod record;
pub use record::{
    GLOBAL_BACKOFF_ID, GlobalBackoff, IN_FLIGHT_COUNTER_ID, InFlightCounter, InFlightJobRecord,
    JOB_RECORD_PREFIX, JobToken, MinuteKey, RPM_WINDOW_PREFIX, RpmWindow,
};

mod settings;
pub use settings::GateSettings;

mod strategy;
pub use strategy::{BackoffStrategy, JitterStrategy};

mod job;
pub use job::{FailureKind, FailureRecord, JobKey, JobState, QueueTier, RetryMetadata};

mod view;
pub use view::{Diagnosis, Health, Usage};
