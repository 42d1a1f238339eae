//! The storage engine boundary.
//!
//! [`Engine`] is the narrow set of native calls the environment layer needs:
//! open and close an environment, and begin, commit or abort a (possibly
//! nested) transaction. [`Mdbx`] implements it on top of libmdbx.

use crate::{EngineResult, EnvConfig, EnvironmentFlags};
use std::{fmt, path::Path};

mod mdbx;
pub use mdbx::{Mdbx, MdbxEnv, MdbxTxn};

/// Native calls into an embedded transactional storage engine.
///
/// Commit and abort consume the transaction handle, so each handle is
/// finished exactly once.
pub trait Engine: fmt::Debug + Send + Sync + 'static {
    /// Native environment handle.
    type Env: fmt::Debug + Send + Sync;

    /// Native transaction handle.
    type Txn: fmt::Debug + Send;

    /// Opens the environment at `path`.
    fn open(
        &self,
        path: &Path,
        flags: EnvironmentFlags,
        config: &EnvConfig,
    ) -> EngineResult<Self::Env>;

    /// Closes the environment, releasing the handle.
    fn close(&self, env: Self::Env) -> EngineResult<()>;

    /// Begins a transaction, nested under `parent` if one is given.
    fn begin(&self, env: &Self::Env, parent: Option<&Self::Txn>) -> EngineResult<Self::Txn>;

    /// Commits the transaction.
    fn commit(&self, txn: Self::Txn) -> EngineResult<()>;

    /// Aborts the transaction.
    fn abort(&self, txn: Self::Txn) -> EngineResult<()>;
}
