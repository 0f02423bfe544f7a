// Task Context
// Per-task execution context: session id, autonomous marker, and the root
// cancellation scope. Passed explicitly through every task entry point.

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct TaskContext {
    session_id: Option<String>,
    autonomous: bool,
    cancel: CancellationToken,
}

impl TaskContext {
    /// A context with a human on the other end; dangerous tools may prompt.
    pub fn interactive(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            autonomous: false,
            cancel: CancellationToken::new(),
        }
    }

    /// A scheduler-dispatched context: no human present, dangerous tools
    /// must not prompt.
    pub fn autonomous(session_id: Option<String>) -> Self {
        Self {
            session_id,
            autonomous: true,
            cancel: CancellationToken::new(),
        }
    }

    /// An autonomous context whose cancellation scope is a child of
    /// `parent`, so cancelling the parent tears the task down.
    pub fn autonomous_scoped(session_id: Option<String>, parent: &CancellationToken) -> Self {
        Self {
            session_id,
            autonomous: true,
            cancel: parent.child_token(),
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn is_autonomous(&self) -> bool {
        self.autonomous
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Derive a child scope: cancelling the parent cancels the child, not
    /// the other way around.
    pub fn child(&self) -> Self {
        Self {
            session_id: self.session_id.clone(),
            autonomous: self.autonomous,
            cancel: self.cancel.child_token(),
        }
    }
}
