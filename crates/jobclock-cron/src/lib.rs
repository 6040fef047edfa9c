//! jobclock-cron: Persistent job scheduling.
//!
//! Jobs live in a single JSON document shared by every process that points
//! at it. [`CronService`] is the entry point: it creates and updates jobs,
//! hands due work to an executor, and records run outcomes. Executing a
//! payload is the caller's business.

pub mod clock;
pub mod due;
pub mod error;
pub mod lock;
pub mod patch;
pub mod schedule;
pub mod service;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use due::{is_due, select_due, summarize};
pub use error::{CronError, ErrorKind, Result};
pub use schedule::{compute_next_run, validate_schedule};
pub use service::CronService;
pub use store::{JobStore, Mutation};
