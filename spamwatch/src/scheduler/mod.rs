//! Recurring check jobs.
//!
//! - one implicit default job on a fixed interval taken from settings
//! - one job per active persisted schedule, on its cadence expression
//!
//! Each firing checks all active phones sequentially (see [`BatchRunner`]).

mod batch;
mod job;
mod service;

pub use batch::{BatchReport, BatchRunner, SpamHit, spam_summary};
pub use job::{FireOutcome, JobState, JobStatus};
pub use service::{Scheduler, SchedulerConfig, SchedulerState, SchedulerStatus};
