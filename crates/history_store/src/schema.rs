use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::HistoryStoreError;

/// One completed question/answer exchange.
///
/// `id` is the session id of the ask that produced it; `ts` is the
/// completion time in milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: String,
    pub question: String,
    pub answer: String,
    pub ts: i64,
}

impl HistoryRecord {
    /// Stamp a new record with the current time.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        question: impl Into<String>,
        answer: impl Into<String>,
    ) -> Self {
        Self::at(id, question, answer, now_millis())
    }

    #[must_use]
    pub fn at(
        id: impl Into<String>,
        question: impl Into<String>,
        answer: impl Into<String>,
        ts: i64,
    ) -> Self {
        Self {
            id: id.into(),
            question: question.into(),
            answer: answer.into(),
            ts,
        }
    }

    pub fn timestamp(&self) -> Result<OffsetDateTime, HistoryStoreError> {
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(self.ts) * 1_000_000)
            .map_err(|_| HistoryStoreError::InvalidTimestamp { ts: self.ts })
    }

    pub fn formatted_timestamp(&self) -> Result<String, HistoryStoreError> {
        self.timestamp()?
            .format(&Rfc3339)
            .map_err(HistoryStoreError::TimeFormat)
    }
}

/// On-disk layout of the history file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryDocument {
    #[serde(default)]
    pub items: Vec<HistoryRecord>,
}

/// Current UTC time in epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    i64::try_from(nanos).unwrap_or(i64::MAX)
}
