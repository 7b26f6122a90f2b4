//! Per-session flags shared between the session and every table it hosts.
//!
//! The session and all of its virtual-table cursors hold the same
//! `Arc<SessionState>`. Precondition checks fail fast; nothing here blocks.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use gentab_error::{GentabError, ResourceState, Result};
use gentab_types::IntegerMode;
use parking_lot::Mutex;
use tracing::{debug, warn};

pub struct SessionState {
    open: AtomicBool,
    busy: AtomicBool,
    unsafe_mode: AtomicBool,
    strict_integers: AtomicBool,
    iterators: AtomicUsize,
    /// Set when a table turned down a plan during the current engine call.
    plan_rejected: AtomicBool,
    /// Error raised inside an engine callback, waiting for the engine call
    /// that triggered it to return.
    pending: Mutex<Option<GentabError>>,
}

impl SessionState {
    pub fn new(integer_mode: IntegerMode, unsafe_mode: bool) -> Self {
        Self {
            open: AtomicBool::new(true),
            busy: AtomicBool::new(false),
            unsafe_mode: AtomicBool::new(unsafe_mode),
            strict_integers: AtomicBool::new(integer_mode == IntegerMode::Strict),
            iterators: AtomicUsize::new(0),
            plan_rejected: AtomicBool::new(false),
            pending: Mutex::new(None),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Flip `open` to false. Returns `true` only for the call that closed it.
    pub fn mark_closed(&self) -> bool {
        self.open.swap(false, Ordering::AcqRel)
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn iterator_count(&self) -> usize {
        self.iterators.load(Ordering::Acquire)
    }

    pub fn unsafe_mode(&self) -> bool {
        self.unsafe_mode.load(Ordering::Acquire)
    }

    pub fn set_unsafe_mode(&self, enabled: bool) {
        self.unsafe_mode.store(enabled, Ordering::Release);
    }

    pub fn integer_mode(&self) -> IntegerMode {
        if self.strict_integers.load(Ordering::Acquire) {
            IntegerMode::Strict
        } else {
            IntegerMode::Loose
        }
    }

    pub fn set_integer_mode(&self, mode: IntegerMode) {
        self.strict_integers
            .store(mode == IntegerMode::Strict, Ordering::Release);
    }

    pub fn require_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(ResourceState::NotOpen.into())
        }
    }

    pub fn require_not_busy(&self) -> Result<()> {
        if self.is_busy() {
            Err(ResourceState::Busy.into())
        } else {
            Ok(())
        }
    }

    pub fn require_no_iterators(&self) -> Result<()> {
        match self.iterator_count() {
            0 => Ok(()),
            count => Err(ResourceState::IteratorsActive { count }.into()),
        }
    }

    /// Like [`Self::require_no_iterators`], but waived in unsafe mode.
    pub fn require_no_iterators_unless_unsafe(&self) -> Result<()> {
        if self.unsafe_mode() {
            Ok(())
        } else {
            self.require_no_iterators()
        }
    }

    /// Enter a non-reentrant operation. `busy` is cleared when the guard drops.
    pub fn mark_busy(&self) -> Result<BusyGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| GentabError::from(ResourceState::Busy))?;
        Ok(BusyGuard { state: self })
    }

    /// Register a live iterator for as long as the guard is held.
    pub fn enter_iteration(self: &Arc<Self>) -> IterationGuard {
        let count = self.iterators.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(target: "gentab.vtab", count, "iterator opened");
        IterationGuard {
            state: Arc::clone(self),
        }
    }

    /// Park an error raised inside an engine callback.
    ///
    /// Only one error may be outstanding. A second one is a logic error: it
    /// trips a debug assertion, and release builds keep the first.
    pub fn defer_error(&self, err: GentabError) {
        let mut slot = self.pending.lock();
        debug_assert!(
            slot.is_none(),
            "deferred error already pending; new error: {err}"
        );
        if let Some(existing) = slot.as_ref() {
            warn!(
                target: "gentab.vtab",
                pending = %existing,
                dropped = %err,
                "deferred error already pending"
            );
            return;
        }
        debug!(target: "gentab.vtab", error = %err, "deferring callback error");
        *slot = Some(err);
    }

    /// Take the pending error, leaving the slot empty.
    pub fn take_pending_error(&self) -> Option<GentabError> {
        self.pending.lock().take()
    }

    pub fn has_pending_error(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Drop an error left behind by a callback whose engine call succeeded.
    pub fn discard_stale_error(&self) {
        self.plan_rejected.store(false, Ordering::Release);
        if let Some(stale) = self.take_pending_error() {
            warn!(target: "gentab.vtab", error = %stale, "discarding stale deferred error");
        }
    }

    /// Record that a table rejected a plan because a parameter constraint
    /// was unusable. Unlike [`Self::defer_error`] this may happen many times
    /// per engine call, since the planner keeps trying other join orders.
    pub fn note_plan_rejected(&self) {
        self.plan_rejected.store(true, Ordering::Release);
    }

    /// Whether a plan was rejected since the last check. Clears the marker.
    pub fn take_plan_rejected(&self) -> bool {
        self.plan_rejected.swap(false, Ordering::AcqRel)
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(IntegerMode::default(), false)
    }
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("open", &self.is_open())
            .field("busy", &self.is_busy())
            .field("unsafe_mode", &self.unsafe_mode())
            .field("integer_mode", &self.integer_mode())
            .field("iterators", &self.iterator_count())
            .field("has_pending_error", &self.has_pending_error())
            .finish()
    }
}

/// Clears `busy` on drop.
#[must_use = "the session is busy only while the guard is alive"]
pub struct BusyGuard<'a> {
    state: &'a SessionState,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.state.busy.store(false, Ordering::Release);
    }
}

/// Decrements the live-iterator count on drop.
#[must_use = "the iterator is counted only while the guard is alive"]
pub struct IterationGuard {
    state: Arc<SessionState>,
}

impl fmt::Debug for IterationGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IterationGuard").finish_non_exhaustive()
    }
}

impl Drop for IterationGuard {
    fn drop(&mut self) {
        let previous = self.state.iterators.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "iterator count underflow");
        debug!(target: "gentab.vtab", count = previous.saturating_sub(1), "iterator closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_guard_clears_on_drop() {
        let state = SessionState::default();
        {
            let _busy = state.mark_busy().unwrap();
            assert!(state.is_busy());
            assert!(matches!(
                state.mark_busy(),
                Err(GentabError::ResourceState(ResourceState::Busy))
            ));
            assert!(state.require_not_busy().is_err());
        }
        assert!(!state.is_busy());
        state.require_not_busy().unwrap();
    }

    #[test]
    fn busy_guard_clears_on_early_return() {
        fn failing(state: &SessionState) -> Result<()> {
            let _busy = state.mark_busy()?;
            Err(GentabError::internal("step failed"))
        }
        let state = SessionState::default();
        assert!(failing(&state).is_err());
        assert!(!state.is_busy());
    }

    #[test]
    fn iteration_guards_count() {
        let state = Arc::new(SessionState::default());
        let first = state.enter_iteration();
        let second = state.enter_iteration();
        assert_eq!(state.iterator_count(), 2);
        assert!(matches!(
            state.require_no_iterators(),
            Err(GentabError::ResourceState(ResourceState::IteratorsActive { count: 2 }))
        ));
        drop(first);
        assert_eq!(state.iterator_count(), 1);
        drop(second);
        assert_eq!(state.iterator_count(), 0);
        state.require_no_iterators().unwrap();
    }

    #[test]
    fn unsafe_mode_waives_iterator_check() {
        let state = Arc::new(SessionState::default());
        let _it = state.enter_iteration();
        assert!(state.require_no_iterators_unless_unsafe().is_err());
        state.set_unsafe_mode(true);
        state.require_no_iterators_unless_unsafe().unwrap();
        assert!(state.require_no_iterators().is_err());
    }

    #[test]
    fn close_happens_once() {
        let state = SessionState::default();
        state.require_open().unwrap();
        assert!(state.mark_closed());
        assert!(!state.mark_closed());
        assert!(matches!(
            state.require_open(),
            Err(GentabError::ResourceState(ResourceState::NotOpen))
        ));
    }

    #[test]
    fn pending_error_is_taken_once() {
        let state = SessionState::default();
        assert!(!state.has_pending_error());
        state.defer_error(GentabError::internal("from callback"));
        assert!(state.has_pending_error());
        let err = state.take_pending_error().unwrap();
        assert_eq!(err.to_string(), "internal error: from callback");
        assert!(state.take_pending_error().is_none());
    }

    #[test]
    #[should_panic(expected = "deferred error already pending")]
    #[cfg(debug_assertions)]
    fn second_pending_error_is_asserted() {
        let state = SessionState::default();
        state.defer_error(GentabError::internal("first"));
        state.defer_error(GentabError::internal("second"));
    }

    #[test]
    fn plan_rejection_marker_is_taken_once() {
        let state = SessionState::default();
        assert!(!state.take_plan_rejected());
        state.note_plan_rejected();
        state.note_plan_rejected();
        assert!(!state.has_pending_error());
        assert!(state.take_plan_rejected());
        assert!(!state.take_plan_rejected());

        state.note_plan_rejected();
        state.discard_stale_error();
        assert!(!state.take_plan_rejected());
    }

    #[test]
    fn integer_mode_toggles() {
        let state = SessionState::new(IntegerMode::Strict, false);
        assert_eq!(state.integer_mode(), IntegerMode::Strict);
        state.set_integer_mode(IntegerMode::Loose);
        assert_eq!(state.integer_mode(), IntegerMode::Loose);
    }
}
