//! # td-io: The "Engine" of TANDEM
//!
//! Everything that talks to an upstream platform: HTTP transports, bearer
//! credentials, the per-platform token bucket, the retry state machine and
//! the paged [`ExecutionClient`] that ties them together.

pub mod bucket;
pub mod client;
pub mod credentials;
pub mod retry;
pub mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod scripted;

pub use bucket::{RateLimit, TokenBucket};
pub use client::{ExecutionClient, PageStream};
pub use credentials::{CredentialProvider, StaticToken, TokenFile};
pub use retry::{RetryDecision, RetryPolicy, RetryState};
pub use transport::{Ga4Transport, GscTransport, PageCursor, PlatformTransport, TransportError};
