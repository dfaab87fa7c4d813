use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::CheckError;
use crate::tuple::{SnapshotToken, TenantId};

/// Everything one request carries through its evaluation tree: which data
/// to read, how much recursion is left, and when to stop.
///
/// Clones share the same cancellation token, so canceling the request
/// reaches every branch spawned from it.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    tenant: TenantId,
    snapshot: SnapshotToken,
    schema_version: String,
    depth: u32,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl InvocationContext {
    pub fn new(
        tenant: TenantId,
        snapshot: SnapshotToken,
        schema_version: impl Into<String>,
        depth: u32,
    ) -> Self {
        Self {
            tenant,
            snapshot,
            schema_version: schema_version.into(),
            depth,
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn snapshot(&self) -> SnapshotToken {
        self.snapshot
    }

    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Context for one level deeper in the evaluation tree. Fails once the
    /// budget would reach zero.
    pub fn descend(&self) -> Result<Self, CheckError> {
        match self.depth.checked_sub(1) {
            Some(depth) if depth > 0 => Ok(Self {
                depth,
                ..self.clone()
            }),
            _ => Err(CheckError::DepthExceeded),
        }
    }

    pub fn ensure_active(&self) -> Result<(), CheckError> {
        if self.cancel.is_cancelled() {
            return Err(CheckError::Canceled);
        }
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(CheckError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Drives `fut` until it completes or the request is canceled or runs out
    /// of time, whichever happens first.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, CheckError>
    where
        F: Future<Output = Result<T, CheckError>>,
    {
        self.ensure_active()?;
        guarded(&self.cancel, self.deadline, fut).await
    }
}

/// Races `fut` against `cancel` and `deadline`. Used directly for the reads
/// that happen before a context exists.
pub(crate) async fn guarded<T, F>(
    cancel: &CancellationToken,
    deadline: Option<Instant>,
    fut: F,
) -> Result<T, CheckError>
where
    F: Future<Output = Result<T, CheckError>>,
{
    let expired = async {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CheckError::Canceled),
        _ = expired => Err(CheckError::DeadlineExceeded),
        result = fut => result,
    }
}
