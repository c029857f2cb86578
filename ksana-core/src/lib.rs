//! Scheduling core: job model, durable storage, the clock abstraction, the
//! HTTP executor, and the min-heap coordinator that ties them together.
//! The REST surface, auth, and process wiring live in `ksana-server`; this
//! crate has no knowledge of HTTP inbound to the service, only outbound.

pub mod clock;
pub mod duration;
pub mod error;
pub mod executor;
pub mod model;
pub mod scheduler;
pub mod store;

pub use clock::{Clock, ManualClock, RealClock};
pub use duration::KDuration;
pub use error::{CoreError, CoreResult};
pub use executor::Executor;
pub use model::{HttpConfig, HttpMethod, Job, JobStatus, JobType, Schedule, ScheduleKind};
pub use scheduler::{JobRunner, Scheduler};
pub use store::{JobStore, JsonStore};
