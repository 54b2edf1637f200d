mod usage;
pub use usage::Usage;

mod health;
pub use health::{Diagnosis, Health};
