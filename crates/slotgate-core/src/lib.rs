pub mod admission;
pub mod backoff;
pub mod clock;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod reconciler;
pub mod retry;
pub mod runner;
pub mod settings;
pub mod store;
pub mod tracker;

pub mod prelude {
    pub use crate::admission::{AdmissionReport, QueueAdmission};
    pub use crate::clock::{Clock, ClockHandle, SystemClock};
    pub use crate::error::CoreError;
    pub use crate::queue::{FsJobQueue, JobQueue, MemoryJobQueue, QueueError};
    pub use crate::reconciler::{ReconcileReport, Reconciler};
    pub use crate::retry::{RetryOutcome, RetryRouter};
    pub use crate::runner::{JobRunner, RunnerError};
    pub use crate::settings::{SettingsProvider, SettingsSource, StaticSettings, TomlFileSettings};
    pub use crate::store::{MemorySlotStore, SlotStore, StoreError};
    pub use crate::tracker::{CallError, Limit, SlotGuard, SlotTracker, TrackerError};
}
