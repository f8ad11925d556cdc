/*!
 * Cancellation and deadlines threaded through every remote operation
 */

use std::fmt;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Why an operation stopped before completing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    /// The run was cancelled (Ctrl-C or an explicit `cancel()`)
    Cancelled,
    /// The operation's deadline passed
    DeadlineExceeded,
}

impl fmt::Display for Interrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interrupted::Cancelled => write!(f, "cancelled"),
            Interrupted::DeadlineExceeded => write!(f, "timed out"),
        }
    }
}

/// Cancellation signal plus optional deadline
///
/// Cheap to clone. Blocking loops call [`RunContext::check`] between units of
/// work; a child created with [`RunContext::with_timeout`] is cancelled along
/// with its parent but may carry an earlier deadline.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a child bounded by `timeout` from now (or the parent's deadline,
    /// whichever comes first)
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Same as [`with_timeout`](Self::with_timeout) when `timeout` is set, a plain clone otherwise
    pub fn with_optional_timeout(&self, timeout: Option<Duration>) -> Self {
        match timeout {
            Some(t) => self.with_timeout(t),
            None => self.clone(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` means unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn check(&self) -> Result<(), Interrupted> {
        if self.token.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Interrupted::DeadlineExceeded);
            }
        }
        Ok(())
    }

    /// Token for async code that wants to `select!` on cancellation
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_context_passes_check() {
        let ctx = RunContext::new();
        assert!(ctx.check().is_ok());
        assert_eq!(ctx.remaining(), None);
    }

    #[test]
    fn test_cancel_propagates_to_child() {
        let parent = RunContext::new();
        let child = parent.with_timeout(Duration::from_secs(60));
        parent.cancel();
        assert_eq!(child.check(), Err(Interrupted::Cancelled));
    }

    #[test]
    fn test_child_cancel_does_not_touch_parent() {
        let parent = RunContext::new();
        let child = parent.with_timeout(Duration::from_secs(60));
        child.cancel();
        assert!(parent.check().is_ok());
    }

    #[test]
    fn test_expired_deadline() {
        let ctx = RunContext::new().with_timeout(Duration::ZERO);
        assert_eq!(ctx.check(), Err(Interrupted::DeadlineExceeded));
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn test_child_keeps_earlier_parent_deadline() {
        let parent = RunContext::new().with_timeout(Duration::from_secs(1));
        let child = parent.with_timeout(Duration::from_secs(3600));
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[test]
    fn test_optional_timeout_none_is_unbounded() {
        let ctx = RunContext::new().with_optional_timeout(None);
        assert!(ctx.deadline().is_none());
    }
}
