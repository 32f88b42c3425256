//! User confirmation of gated tool calls.
//!
//! Confirmation is a suspension point: the controller awaits the
//! [`Confirmer`] and races it against cancellation, so a pending prompt
//! never outlives an interrupted turn.

use futures::future::BoxFuture;
use serde_json::Value;

/// What the user is asked to approve.
#[derive(Debug, Clone, Copy)]
pub struct ConfirmationRequest<'a> {
    pub tool: &'a str,
    pub arguments: &'a Value,
    pub reason: &'a str,
    /// Description of the effect, e.g. a unified diff for writes.
    pub preview: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    Approved,
    Denied(Option<String>),
}

pub trait Confirmer: Send + Sync {
    fn confirm<'a>(&'a self, request: ConfirmationRequest<'a>) -> BoxFuture<'a, Confirmation>;
}

/// Denies everything. The default for headless runs.
pub struct AutoDeny;

impl Confirmer for AutoDeny {
    fn confirm<'a>(&'a self, _request: ConfirmationRequest<'a>) -> BoxFuture<'a, Confirmation> {
        Box::pin(async { Confirmation::Denied(Some("no interactive user to confirm".into())) })
    }
}

/// A confirmer backed by a synchronous closure.
pub struct FnConfirmer<F>(F)
where
    F: Fn(&ConfirmationRequest<'_>) -> Confirmation + Send + Sync;

impl<F> FnConfirmer<F>
where
    F: Fn(&ConfirmationRequest<'_>) -> Confirmation + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Confirmer for FnConfirmer<F>
where
    F: Fn(&ConfirmationRequest<'_>) -> Confirmation + Send + Sync,
{
    fn confirm<'a>(&'a self, request: ConfirmationRequest<'a>) -> BoxFuture<'a, Confirmation> {
        let answer = (self.0)(&request);
        Box::pin(async move { answer })
    }
}
