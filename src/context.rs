use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::Span;

use crate::error::DbError;

/// Caller-supplied cancellation and trace context threaded through execution.
#[derive(Debug, Clone)]
pub struct QueryContext {
    cancel: CancellationToken,
    span: Span,
}

impl Default for QueryContext {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryContext {
    /// A fresh context whose parent span is the current one.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            span: Span::current(),
        }
    }

    #[must_use]
    pub fn with_token(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            span: Span::current(),
        }
    }

    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Child context cancelled together with this one.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            span: self.span.clone(),
        }
    }

    #[must_use]
    pub fn span(&self) -> &Span {
        &self.span
    }

    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run `fut` unless the context is cancelled first.
    ///
    /// # Errors
    /// Returns `DbError::Cancelled` when the token fires before `fut` completes.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, DbError>
    where
        F: Future<Output = Result<T, DbError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(DbError::Cancelled);
        }
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(DbError::Cancelled),
            res = fut => res,
        }
    }
}
