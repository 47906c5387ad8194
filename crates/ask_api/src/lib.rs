//! Transport-only client for the streaming ask endpoint.
//!
//! This crate owns request building, the incremental `data:` frame decoder,
//! the one-attempt stream executor and the retry controller. It contains no
//! history persistence and no UI coupling; those live with the session
//! coordinator in the root crate.
//!
//! Malformed frames are dropped with a [`FrameParseWarning`] log line and
//! never abort a stream. Transport and stream failures end the attempt and are
//! retried by [`retry::run_with_retry`].

pub mod cancel;
pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod headers;
pub mod payload;
pub mod retry;
pub mod sse;

pub use cancel::CancellationSignal;
pub use client::{AskApiClient, EventSink, EventStream, StreamExecutor, StreamResult};
pub use config::AskApiConfig;
pub use endpoint::{ask_endpoint, health_endpoint};
pub use error::{AskApiError, AskErrorKind, FrameParseWarning, TimeoutPhase};
pub use events::{AskEvent, StreamCompletion, StreamOutcome};
pub use payload::AskRequest;
pub use retry::{run_with_retry, RetryClassification, RetryPolicy};
pub use sse::FrameDecoder;
