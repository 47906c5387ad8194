//! Session coordinator: one question in, one answer persisted.

use std::sync::{Arc, Mutex, MutexGuard};

use ask_api::error::GENERIC_FAILURE_MESSAGE;
use ask_api::{
    run_with_retry, AskApiClient, AskApiConfig, AskApiError, AskEvent, AskRequest,
    CancellationSignal, EventSink, RetryPolicy, StreamExecutor,
};
use history_store::{HistoryRecord, HistoryStore, HistoryStoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinError;
use tracing::{error, info};

use crate::observer::AskObserver;

/// Result of one logical ask. Never an error; failures carry a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskOutcome {
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AskOutcome {
    pub fn completed() -> Self {
        Self {
            done: true,
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            done: false,
            message: Some(message.into()),
        }
    }
}

/// Why an ask failed inside the coordinator.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Api(#[from] AskApiError),

    #[error("failed to save history: {0}")]
    History(#[from] HistoryStoreError),

    #[error("failed to save history: {0}")]
    HistoryTask(#[from] JoinError),
}

impl SessionError {
    pub fn user_message(&self) -> String {
        let message = match self {
            Self::Api(error) => error.user_message(),
            Self::History(_) | Self::HistoryTask(_) => self.to_string(),
        };
        if message.trim().is_empty() {
            GENERIC_FAILURE_MESSAGE.to_owned()
        } else {
            message
        }
    }
}

/// Concatenated delta text of the current attempt.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AnswerAccumulator {
    text: String,
}

impl AnswerAccumulator {
    pub fn push(&mut self, event: &AskEvent) {
        if let Some(delta) = event.delta_text() {
            self.text.push_str(delta);
        }
    }

    /// Drop text from an abandoned attempt. Called at the start of every
    /// attempt, so a retried ask never stores partial text from a failed one.
    pub fn reset(&mut self) {
        self.text.clear();
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

struct SessionSink<'a> {
    session_id: &'a str,
    observer: &'a dyn AskObserver,
    answer: &'a Mutex<AnswerAccumulator>,
}

impl EventSink for SessionSink<'_> {
    fn on_event(&self, event: &AskEvent) {
        lock_unpoisoned(self.answer).push(event);
        self.observer.on_event(self.session_id, event);
    }
}

/// Drives one ask end to end: validate, stream with retry, accumulate,
/// persist, notify.
///
/// Asks on one coordinator may run concurrently. Each owns its decoder,
/// accumulator and attempt state; the executor's connection pool is shared.
#[derive(Clone)]
pub struct SessionCoordinator {
    executor: Arc<dyn StreamExecutor>,
    history: Arc<dyn HistoryStore>,
    observer: Arc<dyn AskObserver>,
    retry: RetryPolicy,
}

impl SessionCoordinator {
    pub fn new(
        executor: Arc<dyn StreamExecutor>,
        history: Arc<dyn HistoryStore>,
        observer: Arc<dyn AskObserver>,
    ) -> Self {
        Self {
            executor,
            history,
            observer,
            retry: RetryPolicy::default(),
        }
    }

    /// Coordinator backed by a fresh [`AskApiClient`].
    pub fn from_config(
        config: AskApiConfig,
        history: Arc<dyn HistoryStore>,
        observer: Arc<dyn AskObserver>,
    ) -> Result<Self, AskApiError> {
        let client = AskApiClient::new(config)?;
        Ok(Self::new(Arc::new(client), history, observer))
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub async fn ask(&self, question: &str, session_id: &str) -> AskOutcome {
        self.ask_with_cancel(question, session_id, None).await
    }

    /// Like [`ask`](Self::ask), abandoning the request once `cancellation`
    /// is raised. A cancelled ask is a failed ask.
    pub async fn ask_with_cancel(
        &self,
        question: &str,
        session_id: &str,
        cancellation: Option<&CancellationSignal>,
    ) -> AskOutcome {
        info!(session_id, "sending question");

        match self.run(question, session_id, cancellation).await {
            Ok(answer_len) => {
                info!(session_id, answer_len, "question completed");
                AskOutcome::completed()
            }
            Err(failure) => {
                let message = failure.user_message();
                error!(session_id, error = %failure, "ask failed");
                self.observer.on_error(session_id, &message);
                AskOutcome::failed(message)
            }
        }
    }

    async fn run(
        &self,
        question: &str,
        session_id: &str,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<usize, SessionError> {
        let request = AskRequest::new(question, session_id);
        request.validate()?;

        let answer = Mutex::new(AnswerAccumulator::default());
        let sink = SessionSink {
            session_id,
            observer: self.observer.as_ref(),
            answer: &answer,
        };
        let sink: &dyn EventSink = &sink;
        let executor = self.executor.as_ref();
        let observer = self.observer.as_ref();
        let (answer_ref, request_ref) = (&answer, &request);

        run_with_retry(&self.retry, cancellation, move |attempt| {
            lock_unpoisoned(answer_ref).reset();
            observer.on_attempt(session_id, attempt);
            executor.execute_attempt(request_ref, sink, cancellation)
        })
        .await?;

        let answer = answer
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .into_string();
        let answer_len = answer.len();
        // Stores may do blocking file I/O; keep it off the async workers.
        let history = Arc::clone(&self.history);
        let record = HistoryRecord::new(session_id, question, answer);
        tokio::task::spawn_blocking(move || history.append(record)).await??;
        Ok(answer_len)
    }

    /// Stored exchanges, most recent first.
    pub fn history(&self) -> Result<Vec<HistoryRecord>, HistoryStoreError> {
        self.history.list()
    }

    pub fn clear_history(&self) -> Result<(), HistoryStoreError> {
        self.history.clear()
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
