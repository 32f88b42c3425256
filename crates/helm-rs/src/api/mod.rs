//! Model access layer.
//!
//! - [`transport`]: the [`ChatTransport`] trait, implemented by
//!   [`HttpChatClient`](crate::HttpChatClient) and by test doubles.
//! - [`retry`]: [`RetryingTransport`] with 1s/2s/4s backoff over four attempts.

pub mod retry;
pub mod transport;

pub use retry::{RetryConfig, RetryingTransport};
pub use transport::ChatTransport;
