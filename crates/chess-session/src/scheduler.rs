//! Generation-bound cancellable tasks.
//!
//! Every schedule or cancel bumps the generation. A firing task presents its
//! token; only the token of the current pending task is honoured, so a timer
//! that outlived a cancel or a newer schedule is a no-op.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskToken {
    pub generation: u64,
    /// Timeline length the task was scheduled for.
    pub ply: usize,
}

#[derive(Debug, Default)]
pub struct Scheduler {
    generation: u64,
    pending: Option<TaskToken>,
}

impl Scheduler {
    pub fn schedule(&mut self, ply: usize) -> TaskToken {
        self.generation += 1;
        let token = TaskToken {
            generation: self.generation,
            ply,
        };
        self.pending = Some(token);
        token
    }

    /// Invalidate whatever is pending. Returns the cancelled token, if any.
    pub fn cancel(&mut self) -> Option<TaskToken> {
        self.generation += 1;
        self.pending.take()
    }

    /// Consume the pending task if `token` is still the current one.
    pub fn take_if_current(&mut self, token: TaskToken) -> bool {
        if self.pending == Some(token) {
            self.pending = None;
            true
        } else {
            false
        }
    }

    pub fn pending(&self) -> Option<TaskToken> {
        self.pending
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_token_rejected_after_reschedule() {
        let mut s = Scheduler::default();
        let old = s.schedule(3);
        let new = s.schedule(3);
        assert_ne!(old, new);
        assert!(!s.take_if_current(old));
        assert!(s.take_if_current(new));
        assert!(!s.take_if_current(new));
    }

    #[test]
    fn test_cancel_invalidates() {
        let mut s = Scheduler::default();
        let token = s.schedule(1);
        assert_eq!(s.cancel(), Some(token));
        assert!(!s.take_if_current(token));
        assert_eq!(s.cancel(), None);
        assert_eq!(s.generation(), 3);
    }
}
