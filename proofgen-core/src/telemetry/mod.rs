//! Availability telemetry.
//!
//! Every generation attempt that reached a backend is written to a
//! per-service [`GenerationsLogger`]. The records since the last success
//! tell how long the backend has been failing, which is what
//! [`estimate_time_to_become_available`] turns into a retry hint.
//!
//! # Log format
//!
//! UTF-8 text; each record is `"@@@ "`, a JSON [`LoggerRecord`], and a
//! newline. `@` inside a record is escaped as `\u0040`.

mod availability;
mod logger;
mod record;

pub use availability::{
    estimate_from_failing_since, estimate_time_to_become_available, AvailabilityReport,
    MAX_ESTIMATE, MIN_ESTIMATE,
};
pub use logger::{GenerationAttempt, GenerationsLogger, RECORDS_DELIMITER};
pub use record::{LoggedError, LoggerRecord, ResponseStatus};
