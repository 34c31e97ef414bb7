//! Cancellation and deadline carrier passed explicitly to every network call.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::netx::BoxError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("context canceled")]
    Canceled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// A cancellation token plus an optional deadline.
///
/// Children derived with [`Context::with_timeout`] or [`Context::child`] are
/// canceled together with their parent, never the other way around.
#[derive(Debug, Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl Context {
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// The earlier of the current deadline and `deadline` wins.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            return Some(ContextError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Drives `fut` until it completes, the context is canceled, or the
    /// deadline passes. The latter two surface as [`ContextError`].
    pub async fn run<T, E, F>(&self, fut: F) -> Result<T, BoxError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        if let Some(err) = self.err() {
            return Err(err.into());
        }
        let expiry = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(ContextError::Canceled.into()),
            _ = expiry => Err(ContextError::DeadlineExceeded.into()),
            res = fut => res.map_err(Into::into),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_before_deadline() {
        let ctx = Context::background().with_timeout(Duration::from_secs(5));
        let value = ctx.run(async { Ok::<_, std::io::Error>(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert!(ctx.err().is_none());
    }

    #[tokio::test]
    async fn deadline_interrupts_slow_future() {
        let ctx = Context::background().with_timeout(Duration::from_millis(20));
        let started = Instant::now();
        let err = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, std::io::Error>(())
            })
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<ContextError>(),
            Some(&ContextError::DeadlineExceeded)
        );
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn parent_cancel_reaches_children() {
        let parent = Context::background();
        let child = parent.with_timeout(Duration::from_secs(30));
        let canceler = parent.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceler.cancel();
        });
        let err = child
            .run(std::future::pending::<Result<(), std::io::Error>>())
            .await
            .unwrap_err();
        assert_eq!(err.downcast_ref::<ContextError>(), Some(&ContextError::Canceled));
        assert_eq!(child.err(), Some(ContextError::Canceled));
    }

    #[test]
    fn child_cancel_leaves_parent_alone() {
        let parent = Context::background();
        let child = parent.child();
        child.cancel();
        assert!(child.is_canceled());
        assert!(!parent.is_canceled());
    }

    #[tokio::test]
    async fn earlier_deadline_is_kept() {
        let outer = Context::background().with_timeout(Duration::from_millis(50));
        let inner = outer.with_timeout(Duration::from_secs(60));
        assert_eq!(inner.deadline(), outer.deadline());
    }

    #[tokio::test]
    async fn already_canceled_context_skips_the_future() {
        let ctx = Context::background();
        ctx.cancel();
        let fut = async {
            if ctx.is_canceled() {
                panic!("must not be polled");
            }
            Ok::<(), std::io::Error>(())
        };
        let err = ctx.run(fut).await.unwrap_err();
        assert_eq!(err.downcast_ref::<ContextError>(), Some(&ContextError::Canceled));
    }
}
