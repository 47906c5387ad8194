//! Resilient streaming ask client.
//!
//! A question goes out as one `POST /api/ask`; the answer comes back as a
//! stream of `data:` records that are decoded incrementally, forwarded live to
//! an [`AskObserver`], accumulated, and persisted through a
//! [`HistoryStore`](history_store::HistoryStore) once the stream completes.
//! Failed attempts are retried with capped exponential backoff.
//!
//! Transport lives in [`ask_api`]; persistence in [`history_store`].

pub mod config;
pub mod logging;
pub mod observer;
pub mod session;

pub use ask_api;
pub use history_store;

pub use crate::config::EnvConfig;
pub use crate::observer::{
    AskObserver, ChannelObserver, NoopObserver, SessionUpdate, TracingObserver,
};
pub use crate::session::{AnswerAccumulator, AskOutcome, SessionCoordinator, SessionError};
