//! The seam between the engine and whatever speaks to the model.

use futures::future::BoxFuture;

use crate::error::TransportError;
use crate::{ChatCompletion, ChatRequest, HttpChatClient};

/// A single-attempt chat completion backend.
///
/// Implementations classify their own failures into [`TransportError`];
/// retrying is layered on top by
/// [`RetryingTransport`](super::retry::RetryingTransport).
pub trait ChatTransport: Send + Sync {
    fn send<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> BoxFuture<'a, Result<ChatCompletion, TransportError>>;
}

impl ChatTransport for HttpChatClient {
    fn send<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> BoxFuture<'a, Result<ChatCompletion, TransportError>> {
        Box::pin(self.chat(request))
    }
}

impl<T: ChatTransport + ?Sized> ChatTransport for std::sync::Arc<T> {
    fn send<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> BoxFuture<'a, Result<ChatCompletion, TransportError>> {
        (**self).send(request)
    }
}
