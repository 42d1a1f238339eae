use crate::{EngineError, EngineResult, sys::Engine};
use core::fmt;
use parking_lot::ReentrantMutex;
use std::{
    cell::RefCell,
    sync::Arc,
    thread::{self, ThreadId},
};
use tracing::debug;

/// Lifecycle state of a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    /// The transaction is current or an ancestor of the current one.
    Active,
    /// The transaction committed.
    Committed,
    /// The transaction aborted.
    Aborted,
}

impl TransactionState {
    /// Returns `true` once the transaction has committed or aborted.
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

struct Slot<T> {
    native: Option<T>,
    state: TransactionState,
}

/// One unit of work, possibly nested under a parent.
///
/// Transactions are created by [`Environment::transaction`] and finished by
/// it when the unit of work returns. Collaborators reach the native handle
/// through [`Transaction::with_native`] to issue engine calls inside the
/// unit of work.
///
/// [`Environment::transaction`]: crate::Environment::transaction
pub struct Transaction<E: Engine> {
    id: u64,
    depth: usize,
    parent: Option<Arc<Transaction<E>>>,
    owner: ThreadId,
    slot: ReentrantMutex<RefCell<Slot<E::Txn>>>,
    span: tracing::Span,
}

impl<E: Engine> fmt::Debug for Transaction<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("depth", &self.depth)
            .field("parent", &self.parent.as_ref().map(|p| p.id))
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<E: Engine> Transaction<E> {
    pub(crate) fn new(id: u64, parent: Option<Arc<Self>>, native: E::Txn) -> Self {
        let depth = parent.as_ref().map_or(0, |p| p.depth + 1);
        let span = tracing::debug_span!(target: "docenv", "txn", txn_id = id, depth);
        Self {
            id,
            depth,
            parent,
            owner: thread::current().id(),
            slot: ReentrantMutex::new(RefCell::new(Slot {
                native: Some(native),
                state: TransactionState::Active,
            })),
            span,
        }
    }

    /// Identifier of this transaction, unique within its environment.
    #[inline]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Nesting depth; 0 for a top-level transaction.
    #[inline]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// Returns `true` if this transaction is nested under another.
    #[inline]
    pub const fn is_nested(&self) -> bool {
        self.parent.is_some()
    }

    /// The enclosing transaction, if any.
    pub fn parent(&self) -> Option<&Self> {
        self.parent.as_deref()
    }

    pub(crate) fn parent_arc(&self) -> Option<Arc<Self>> {
        self.parent.clone()
    }

    /// The thread that began this transaction.
    #[inline]
    pub const fn owner(&self) -> ThreadId {
        self.owner
    }

    /// Returns the tracing span for this transaction.
    #[inline]
    pub const fn span(&self) -> &tracing::Span {
        &self.span
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TransactionState {
        self.slot.lock().borrow().state
    }

    /// Returns `true` until the transaction commits or aborts.
    pub fn is_active(&self) -> bool {
        self.state() == TransactionState::Active
    }

    /// Executes `f` with the native transaction handle.
    ///
    /// Nested scopes may be opened from inside `f`.
    ///
    /// Fails with [`EngineError::TransactionFinished`] once the transaction
    /// has committed or aborted, and with [`EngineError::ThreadMismatch`]
    /// when called from a thread other than the owner.
    pub fn with_native<F, R>(&self, f: F) -> EngineResult<R>
    where
        F: FnOnce(&E::Txn) -> R,
    {
        if thread::current().id() != self.owner {
            return Err(EngineError::ThreadMismatch);
        }
        let lock = self.slot.lock();
        let slot = lock.borrow();
        let res = slot.native.as_ref().map(f).ok_or(EngineError::TransactionFinished);
        res
    }

    /// Commits or aborts the native transaction. The state becomes terminal
    /// whatever the engine reports.
    pub(crate) fn finish(&self, engine: &E, commit: bool) -> EngineResult<()> {
        let _guard = self.span.enter();
        let lock = self.slot.lock();
        let native = lock.borrow_mut().native.take().ok_or(EngineError::TransactionFinished)?;

        let res = if commit { engine.commit(native) } else { engine.abort(native) };
        lock.borrow_mut().state = if commit && res.is_ok() {
            TransactionState::Committed
        } else {
            TransactionState::Aborted
        };

        match &res {
            Ok(()) if commit => debug!(target: "docenv", "committed"),
            Ok(()) => debug!(target: "docenv", "aborted"),
            Err(err) => debug!(target: "docenv", %err, commit, "finish failed"),
        }
        res
    }
}
