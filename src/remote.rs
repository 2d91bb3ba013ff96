//! Plumbing shared by every call into an external collaborator.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

/// Transport or query failure reported by a remote system.
///
/// Distinct from a validation failure: a remote error
/// says nothing about whether the replication pair is healthy.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{operation} failed: {message}")]
pub struct RemoteError {
    /// Remote operation that failed (for example `list_active_jobs`).
    pub operation: String,
    /// Message returned by the remote system or its client library.
    pub message: String,
}

impl RemoteError {
    /// Creates a remote error for the named operation.
    #[must_use]
    pub fn new(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Future returned by remote operations.
pub type RemoteFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RemoteError>> + Send + 'a>>;
