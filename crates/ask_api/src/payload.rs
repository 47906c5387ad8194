use serde::{Deserialize, Serialize};

use crate::error::AskApiError;

/// Body of one ask request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskRequest {
    pub question: String,
    pub session_id: String,
}

impl AskRequest {
    pub fn new(question: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            session_id: session_id.into(),
        }
    }

    /// Reject payloads that can never produce a useful answer.
    pub fn validate(&self) -> Result<(), AskApiError> {
        if self.session_id.trim().is_empty() {
            return Err(AskApiError::InvalidRequest(
                "session id must not be empty".to_owned(),
            ));
        }
        if self.question.trim().is_empty() {
            return Err(AskApiError::InvalidRequest(
                "question must not be empty".to_owned(),
            ));
        }
        Ok(())
    }
}
