use crate::{EngineResult, environment::EnvironmentInner, sys::Engine, tx::Transaction};
use std::sync::Arc;
use tracing::warn;

/// Holds a transaction current for the extent of one scoping call.
///
/// Finishing the scope (or dropping it, e.g. while unwinding) finalizes the
/// transaction exactly once and makes its parent current again.
pub(crate) struct TxnScope<'env, E: Engine> {
    env: &'env EnvironmentInner<E>,
    txn: Arc<Transaction<E>>,
    finished: bool,
}

impl<'env, E: Engine> TxnScope<'env, E> {
    pub(crate) const fn new(env: &'env EnvironmentInner<E>, txn: Arc<Transaction<E>>) -> Self {
        Self { env, txn, finished: false }
    }

    pub(crate) fn transaction(&self) -> &Transaction<E> {
        &self.txn
    }

    pub(crate) fn commit(mut self) -> EngineResult<()> {
        self.finish(true)
    }

    pub(crate) fn abort(mut self) -> EngineResult<()> {
        self.finish(false)
    }

    fn finish(&mut self, commit: bool) -> EngineResult<()> {
        self.finished = true;
        let res = self.txn.finish(self.env.engine(), commit);
        self.env.set_current(self.txn.parent_arc());
        res
    }
}

impl<E: Engine> Drop for TxnScope<'_, E> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(err) = self.finish(false) {
            warn!(target: "docenv", txn_id = self.txn.id(), %err, "abort failed while unwinding");
        }
    }
}
