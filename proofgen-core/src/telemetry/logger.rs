//! Generations log file.
//!
//! The log keeps the actual generations only: failures caused by the user
//! or by this crate are never written. Its main purpose is to hold every
//! record since the last success, so that the time a backend needs to
//! become available again can be estimated.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, trace, warn};

use super::record::{LoggedError, LoggerRecord, ResponseStatus};
use crate::error::{Error, Result};
use crate::llm::AnalyzedChat;

/// Delimiter written before every record.
pub const RECORDS_DELIMITER: &str = "@@@ ";

/// Request data the logger needs about one generation attempt.
#[derive(Debug, Clone, Copy)]
pub struct GenerationAttempt<'a> {
    pub model_id: &'a str,
    pub choices: usize,
    pub chat: Option<&'a AnalyzedChat>,
    /// Serialized resolved params, written in debug mode only
    pub params: &'a Value,
    /// Generated proofs, written in debug mode only
    pub generated_raw_proofs: Option<&'a [String]>,
}

/// Append-mostly, single-writer log of generation outcomes.
///
/// - In normal mode only the request shape is logged, and every success
///   truncates the log to that single record.
/// - In debug mode chats, params and generated proofs are logged as well,
///   and the log is never truncated automatically.
#[derive(Debug)]
pub struct GenerationsLogger {
    path: PathBuf,
    debug: bool,
    last_timestamp: i64,
    failures_since_last_success: usize,
    /// Timestamp of the oldest failure since the last success
    failing_since: Option<i64>,
}

impl GenerationsLogger {
    /// Open the log at `path`, creating it if missing and clearing it if
    /// `clean_logs_on_start` is set. A kept log that cannot be parsed is
    /// cleared as well.
    pub fn new(path: impl Into<PathBuf>, debug: bool, clean_logs_on_start: bool) -> Result<Self> {
        let mut logger = Self {
            path: path.into(),
            debug,
            last_timestamp: 0,
            failures_since_last_success: 0,
            failing_since: None,
        };
        if clean_logs_on_start || !logger.path.exists() {
            logger.reset_logs()?;
            return Ok(logger);
        }

        match logger.read_logs_since_last_success() {
            Ok(records) => {
                logger.failures_since_last_success = records.len();
                logger.failing_since = records.iter().map(|r| r.timestamp).min();
                logger.last_timestamp = records.iter().map(|r| r.timestamp).max().unwrap_or(0);
            }
            Err(e) => {
                warn!(path = %logger.path.display(), error = %e, "unreadable generations log, clearing it");
                logger.reset_logs()?;
            }
        }
        Ok(logger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// Failures logged after the last success, without reading the file.
    pub fn failures_since_last_success(&self) -> usize {
        self.failures_since_last_success
    }

    /// Epoch milliseconds of the oldest failure after the last success.
    pub fn failing_since(&self) -> Option<i64> {
        self.failing_since
    }

    pub fn log_generation_succeeded(&mut self, attempt: &GenerationAttempt<'_>) -> Result<()> {
        let record = self.record(attempt, ResponseStatus::Success, None, attempt.generated_raw_proofs);
        let line = Self::to_line(&record)?;
        if self.debug {
            self.append(&line)?;
        } else {
            fs::write(&self.path, line)?;
        }
        self.failures_since_last_success = 0;
        self.failing_since = None;
        Ok(())
    }

    /// Log a failed generation. Only [`Error::GenerationFailed`] is a
    /// loggable failure; anything else reaching the logger is a bug.
    pub fn log_generation_failed(&mut self, attempt: &GenerationAttempt<'_>, error: &Error) -> Result<()> {
        let Error::GenerationFailed(failed) = error else {
            return Err(Error::internal(format!(
                "`GenerationsLogger` is capable of logging only generation errors, but got: {} ({})",
                error.kind_name(),
                error
            )));
        };
        let logged = LoggedError {
            type_name: failed.cause_kind_name(),
            message: failed.cause().to_string(),
        };
        let record = self.record(attempt, ResponseStatus::Failure, Some(logged), None);
        let line = Self::to_line(&record)?;
        self.append(&line)?;
        self.failures_since_last_success += 1;
        self.failing_since.get_or_insert(record.timestamp);
        Ok(())
    }

    /// Every record in the log, oldest first.
    pub fn read_logs(&self) -> Result<Vec<LoggerRecord>> {
        let raw = fs::read_to_string(&self.path)?;
        raw.split(RECORDS_DELIMITER)
            .skip(1)
            .map(LoggerRecord::deserialize_from_string)
            .collect()
    }

    /// Records after the last success, oldest first. The success itself is
    /// excluded.
    pub fn read_logs_since_last_success(&self) -> Result<Vec<LoggerRecord>> {
        let records = self.read_logs()?;
        let start = records
            .iter()
            .rposition(LoggerRecord::is_success)
            .map_or(0, |i| i + 1);
        Ok(records[start..].to_vec())
    }

    /// Clear the log, creating the file if needed.
    pub fn reset_logs(&mut self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, "")?;
        self.failures_since_last_success = 0;
        self.failing_since = None;
        debug!(path = %self.path.display(), "generations log reset");
        Ok(())
    }

    /// Delete the log file.
    pub fn dispose(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn next_timestamp(&mut self) -> i64 {
        self.last_timestamp = Utc::now().timestamp_millis().max(self.last_timestamp);
        self.last_timestamp
    }

    fn record(
        &mut self,
        attempt: &GenerationAttempt<'_>,
        status: ResponseStatus,
        error: Option<LoggedError>,
        generated: Option<&[String]>,
    ) -> LoggerRecord {
        let mut record = LoggerRecord {
            timestamp: self.next_timestamp(),
            model_id: attempt.model_id.to_string(),
            response_status: status,
            choices: attempt.choices,
            estimated_tokens: attempt.chat.map(|chat| chat.estimated_tokens),
            error,
            chat: None,
            params: None,
            generated_raw_proofs: None,
        };
        if self.debug {
            record.chat = attempt.chat.map(|chat| chat.chat.clone());
            record.params = Some(attempt.params.clone());
            record.generated_raw_proofs = generated.map(<[String]>::to_vec);
        }
        record
    }

    fn to_line(record: &LoggerRecord) -> Result<String> {
        Ok(format!("{}{}\n", RECORDS_DELIMITER, record.serialize_to_string()?))
    }

    fn append(&self, line: &str) -> Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(line.as_bytes())?;
        trace!(path = %self.path.display(), "generations log record appended");
        Ok(())
    }
}
