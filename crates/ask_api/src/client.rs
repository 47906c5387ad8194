use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream};
use futures_util::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Client, Response};
use tracing::{debug, info};
use url::Url;

use crate::cancel::{await_or_cancel, CancellationSignal};
use crate::config::AskApiConfig;
use crate::endpoint::{ask_endpoint, health_endpoint};
use crate::error::{parse_error_message, AskApiError, TimeoutPhase};
use crate::events::{AskEvent, StreamCompletion, StreamOutcome};
use crate::headers::{build_headers, to_header_map};
use crate::payload::AskRequest;
use crate::retry::{run_with_retry, RetryPolicy};
use crate::sse::FrameDecoder;

/// Receiver for decoded events. Called synchronously, in stream order.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &AskEvent);
}

impl<F> EventSink for F
where
    F: Fn(&AskEvent) + Send + Sync,
{
    fn on_event(&self, event: &AskEvent) {
        self(event)
    }
}

/// One streamed attempt: open the request, push every event into `sink`,
/// report how the stream ended.
pub trait StreamExecutor: Send + Sync {
    fn execute_attempt<'a>(
        &'a self,
        request: &'a AskRequest,
        sink: &'a dyn EventSink,
        cancellation: Option<&'a CancellationSignal>,
    ) -> BoxFuture<'a, Result<StreamOutcome, AskApiError>>;
}

#[derive(Debug, Clone)]
pub struct AskApiClient {
    http: Client,
    config: AskApiConfig,
    endpoint: Url,
    retry: RetryPolicy,
}

/// Events of the successful attempt of [`AskApiClient::stream`].
#[derive(Debug, Clone)]
pub struct StreamResult {
    pub events: Vec<AskEvent>,
    pub outcome: StreamOutcome,
}

impl AskApiClient {
    pub fn new(config: AskApiConfig) -> Result<Self, AskApiError> {
        let http = Client::builder().build().map_err(AskApiError::from)?;
        Self::with_http_client(http, config)
    }

    /// Build on an existing (possibly shared, connection-pooled) client.
    /// Headers and timeouts still come from `config` on every request.
    pub fn with_http_client(http: Client, config: AskApiConfig) -> Result<Self, AskApiError> {
        let endpoint = ask_endpoint(&config.base_url)?;
        to_header_map(&build_headers(&config))?;
        Ok(Self {
            http,
            config,
            endpoint,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &AskApiConfig {
        &self.config
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn build_headers(&self) -> Result<HeaderMap, AskApiError> {
        to_header_map(&build_headers(&self.config))
    }

    pub fn build_request(
        &self,
        request: &AskRequest,
    ) -> Result<reqwest::RequestBuilder, AskApiError> {
        request.validate()?;

        Ok(self
            .http
            .post(self.endpoint.clone())
            .headers(self.build_headers()?)
            .json(request))
    }

    /// Start one attempt and hand back its event sequence.
    ///
    /// Fails when the request cannot be sent, the response headers do not
    /// arrive in time, or the service answers with a non-success status.
    pub async fn open_stream(
        &self,
        request: &AskRequest,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<EventStream, AskApiError> {
        let builder = self.build_request(request)?;
        info!(session_id = %request.session_id, endpoint = %self.endpoint, "opening ask stream");

        let response = await_or_cancel(
            within(
                builder.send(),
                self.config.timeout,
                TimeoutPhase::ResponseHeaders,
            ),
            cancellation,
        )
        .await??
        .map_err(AskApiError::from)?;

        let response = self.ensure_success(response, cancellation).await?;
        Ok(EventStream::from_response(response)
            .with_idle_timeout(self.config.timeout)
            .with_cancellation(cancellation.cloned()))
    }

    async fn ensure_success(
        &self,
        response: Response,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<Response, AskApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = await_or_cancel(
            within(response.text(), self.config.timeout, TimeoutPhase::Idle),
            cancellation,
        )
        .await?
        .ok()
        .and_then(Result::ok)
        .unwrap_or_default();

        Err(AskApiError::Status {
            status,
            message: parse_error_message(status, &body),
        })
    }

    /// One attempt, no retry.
    pub async fn execute(
        &self,
        request: &AskRequest,
        sink: &dyn EventSink,
    ) -> Result<StreamOutcome, AskApiError> {
        self.execute_with_cancel(request, sink, None).await
    }

    pub async fn execute_with_cancel(
        &self,
        request: &AskRequest,
        sink: &dyn EventSink,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<StreamOutcome, AskApiError> {
        let mut stream = self.open_stream(request, cancellation).await?;
        while let Some(event) = stream.next_event().await {
            sink.on_event(&event?);
        }

        let outcome = stream
            .outcome()
            .ok_or_else(|| AskApiError::Stream("stream ended without completing".to_owned()))?;
        info!(
            session_id = %request.session_id,
            completion = ?outcome.completion,
            events = outcome.events_delivered,
            "ask stream finished"
        );
        Ok(outcome)
    }

    /// Attempts under this client's retry policy, delivering into `sink`.
    ///
    /// Events from a failed attempt have already reached `sink` and are not
    /// retracted; a later attempt starts the stream over.
    pub async fn execute_with_retry(
        &self,
        request: &AskRequest,
        sink: &dyn EventSink,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<StreamOutcome, AskApiError> {
        run_with_retry(&self.retry, cancellation, move |_attempt| {
            self.execute_with_cancel(request, sink, cancellation)
        })
        .await
    }

    /// Collect the events of the first successful attempt.
    pub async fn stream(
        &self,
        request: &AskRequest,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<StreamResult, AskApiError> {
        let events = Mutex::new(Vec::new());
        let sink = |event: &AskEvent| lock_unpoisoned(&events).push(event.clone());
        let sink: &dyn EventSink = &sink;
        let events_ref = &events;

        let outcome = run_with_retry(&self.retry, cancellation, move |_attempt| {
            lock_unpoisoned(events_ref).clear();
            self.execute_with_cancel(request, sink, cancellation)
        })
        .await?;

        let events = events
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(StreamResult { events, outcome })
    }

    /// Probe the service's health endpoint.
    pub async fn health(&self) -> Result<bool, AskApiError> {
        let mut headers = self.build_headers()?;
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let response = within(
            self.http
                .get(health_endpoint(&self.config.base_url)?)
                .headers(headers)
                .send(),
            self.config.timeout,
            TimeoutPhase::ResponseHeaders,
        )
        .await?
        .map_err(AskApiError::from)?;

        debug!(status = %response.status(), "health probe answered");
        Ok(response.status().is_success())
    }
}

impl StreamExecutor for AskApiClient {
    fn execute_attempt<'a>(
        &'a self,
        request: &'a AskRequest,
        sink: &'a dyn EventSink,
        cancellation: Option<&'a CancellationSignal>,
    ) -> BoxFuture<'a, Result<StreamOutcome, AskApiError>> {
        Box::pin(self.execute_with_cancel(request, sink, cancellation))
    }
}

/// Lazy, finite, non-restartable sequence of the events of one attempt.
///
/// Body chunks are pulled only after every event decoded from the previous
/// chunk has been handed out, so consumers see events strictly in stream
/// order. The sequence ends after a finish marker or at transport EOF; an
/// error also ends it.
pub struct EventStream {
    chunks: BoxStream<'static, Result<Vec<u8>, AskApiError>>,
    decoder: Option<FrameDecoder>,
    pending: VecDeque<AskEvent>,
    idle_timeout: Option<Duration>,
    cancellation: Option<CancellationSignal>,
    completion: Option<StreamCompletion>,
    failed: bool,
    delivered: usize,
    discarded_tail_bytes: usize,
}

impl EventStream {
    pub fn from_byte_stream<S>(chunks: S) -> Self
    where
        S: Stream<Item = Result<Vec<u8>, AskApiError>> + Send + 'static,
    {
        Self {
            chunks: chunks.boxed(),
            decoder: Some(FrameDecoder::default()),
            pending: VecDeque::new(),
            idle_timeout: None,
            cancellation: None,
            completion: None,
            failed: false,
            delivered: 0,
            discarded_tail_bytes: 0,
        }
    }

    fn from_response(response: Response) -> Self {
        Self::from_byte_stream(response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|error| AskApiError::Stream(error.to_string()))
        }))
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_cancellation(mut self, cancellation: Option<CancellationSignal>) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub async fn next_event(&mut self) -> Option<Result<AskEvent, AskApiError>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                self.delivered += 1;
                if event.is_finish() {
                    self.complete(StreamCompletion::FinishMarker);
                }
                return Some(Ok(event));
            }

            if self.completion.is_some() || self.failed {
                return None;
            }

            let next = await_or_cancel(
                within(self.chunks.next(), self.idle_timeout, TimeoutPhase::Idle),
                self.cancellation.as_ref(),
            )
            .await
            .and_then(|result| result);

            match next {
                Ok(Some(Ok(chunk))) => {
                    if let Some(decoder) = self.decoder.as_mut() {
                        self.pending.extend(decoder.feed(&chunk));
                    }
                }
                Ok(None) => {
                    self.complete(StreamCompletion::TransportEof);
                    debug!(
                        discarded_tail_bytes = self.discarded_tail_bytes,
                        "stream closed without finish marker"
                    );
                    return None;
                }
                Ok(Some(Err(error))) | Err(error) => {
                    self.fail();
                    return Some(Err(error));
                }
            }
        }
    }

    /// Adapt into a `futures` stream.
    pub fn into_stream(self) -> impl Stream<Item = Result<AskEvent, AskApiError>> + Send {
        stream::unfold(self, |mut events| async move {
            events.next_event().await.map(|item| (item, events))
        })
    }

    pub fn completion(&self) -> Option<StreamCompletion> {
        self.completion
    }

    pub fn events_delivered(&self) -> usize {
        self.delivered
    }

    pub fn dropped_frames(&self) -> usize {
        self.decoder
            .as_ref()
            .map_or(0, FrameDecoder::dropped_frames)
    }

    /// Present once the sequence completed successfully.
    pub fn outcome(&self) -> Option<StreamOutcome> {
        self.completion.map(|completion| StreamOutcome {
            completion,
            events_delivered: self.delivered,
            discarded_tail_bytes: self.discarded_tail_bytes,
        })
    }

    fn complete(&mut self, completion: StreamCompletion) {
        self.completion = Some(completion);
        self.pending.clear();
        if let Some(decoder) = self.decoder.take() {
            self.discarded_tail_bytes = decoder.finish();
        }
        self.chunks = stream::empty().boxed();
    }

    fn fail(&mut self) {
        self.failed = true;
        self.pending.clear();
        self.decoder = None;
        self.chunks = stream::empty().boxed();
    }
}

async fn within<F>(
    future: F,
    limit: Option<Duration>,
    phase: TimeoutPhase,
) -> Result<F::Output, AskApiError>
where
    F: Future,
{
    match limit {
        None => Ok(future.await),
        Some(after) => tokio::time::timeout(after, future)
            .await
            .map_err(|_| AskApiError::Timeout { phase, after }),
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunked(parts: &[&str]) -> EventStream {
        let chunks: Vec<Result<Vec<u8>, AskApiError>> = parts
            .iter()
            .map(|part| Ok(part.as_bytes().to_vec()))
            .collect();
        EventStream::from_byte_stream(stream::iter(chunks))
    }

    #[tokio::test]
    async fn finish_marker_ends_sequence_before_transport_eof() {
        let mut events = chunked(&[
            "data: {\"delta\":\"a\"}\ndata: {\"finish\":true}\ndata: {\"delta\":\"late\"}\n",
            "data: {\"delta\":\"never\"}\n",
        ]);

        assert_eq!(events.next_event().await.expect("first").expect("ok"), AskEvent::delta("a"));
        assert!(events.next_event().await.expect("second").expect("ok").is_finish());
        assert!(events.next_event().await.is_none());

        let outcome = events.outcome().expect("completed");
        assert_eq!(outcome.completion, StreamCompletion::FinishMarker);
        assert_eq!(outcome.events_delivered, 2);
    }

    #[tokio::test]
    async fn eof_without_finish_is_accepted_and_tail_discarded() {
        let mut events = chunked(&["data: {\"delta\":\"a\"}\n", "data: {\"delta\":\"cut"]);

        assert_eq!(events.next_event().await.expect("first").expect("ok"), AskEvent::delta("a"));
        assert!(events.next_event().await.is_none());

        let outcome = events.outcome().expect("completed");
        assert_eq!(outcome.completion, StreamCompletion::TransportEof);
        assert_eq!(outcome.discarded_tail_bytes, "data: {\"delta\":\"cut".len());
    }

    #[tokio::test]
    async fn chunk_error_ends_sequence_without_outcome() {
        let chunks: Vec<Result<Vec<u8>, AskApiError>> = vec![
            Ok(b"data: {\"delta\":\"a\"}\n".to_vec()),
            Err(AskApiError::Stream("connection reset".to_owned())),
            Ok(b"data: {\"delta\":\"b\"}\n".to_vec()),
        ];
        let mut events = EventStream::from_byte_stream(stream::iter(chunks));

        assert!(events.next_event().await.expect("first").is_ok());
        assert!(matches!(
            events.next_event().await,
            Some(Err(AskApiError::Stream(_)))
        ));
        assert!(events.next_event().await.is_none());
        assert!(events.outcome().is_none());
    }

    #[tokio::test]
    async fn into_stream_yields_same_sequence() {
        let collected: Vec<AskEvent> = chunked(&["data: {\"delta\":\"x\"}\n\ndata: {\"delta\":\"y\"}\n"])
            .into_stream()
            .map(|item| item.expect("no errors"))
            .collect()
            .await;

        assert_eq!(collected, vec![AskEvent::delta("x"), AskEvent::delta("y")]);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_fails_stalled_stream() {
        let stalled = stream::pending::<Result<Vec<u8>, AskApiError>>();
        let mut events = EventStream::from_byte_stream(stalled)
            .with_idle_timeout(Some(Duration::from_millis(500)));

        let error = events
            .next_event()
            .await
            .expect("timeout surfaces as an item")
            .expect_err("stalled stream must fail");
        assert!(matches!(
            error,
            AskApiError::Timeout {
                phase: TimeoutPhase::Idle,
                ..
            }
        ));
    }
}
