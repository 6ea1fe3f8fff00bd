//! Request-scoped cancellation and deadlines

use crate::error::{ClientError, ObjectTarget, Operation, Result, TransportResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation token plus optional deadline for one caller request
///
/// Every transport call the client makes on behalf of a request goes through
/// [`RequestContext::run`], which refuses to start once the context is done and
/// abandons the call if the context finishes while it is in flight.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// A context that is never cancelled and has no deadline
    pub fn background() -> Self {
        Self::default()
    }

    /// A context that expires after `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// A context driven by an existing token
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Set an absolute deadline
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// A child context cancelled together with this one
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Cancel this context and its children
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the context has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The deadline, if one is set
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fail if the context can no longer start `operation`
    pub fn check(&self, operation: Operation) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(ClientError::Cancelled { operation });
        }
        if matches!(self.deadline, Some(deadline) if Instant::now() >= deadline) {
            return Err(ClientError::DeadlineExceeded { operation });
        }
        Ok(())
    }

    /// Run a transport call under this context, tagging failures with the
    /// operation and target
    pub async fn run<T, F>(&self, operation: Operation, target: &ObjectTarget, call: F) -> Result<T>
    where
        F: Future<Output = TransportResult<T>>,
    {
        self.check(operation)?;

        let guarded = async {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => Err(ClientError::Cancelled { operation }),
                res = call => res.map_err(|source| ClientError::transport(operation, target, source)),
            }
        };

        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, guarded)
                .await
                .unwrap_or(Err(ClientError::DeadlineExceeded { operation })),
            None => guarded.await,
        }
    }
}
