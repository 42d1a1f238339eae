use crate::{
    ConfigOverrides, ConfigValue, DatabaseConfig, EngineError, EngineResult, EnvConfig,
    EnvironmentFlags,
    sys::{Engine, Mdbx},
    tx::{Transaction, TxnScope},
};
use parking_lot::{Mutex, RwLock};
use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread::{self, ThreadId},
};
use tracing::{debug, warn};

/// Shared state behind an [`Environment`].
pub(crate) struct EnvironmentInner<E: Engine> {
    path: PathBuf,
    flags: EnvironmentFlags,
    engine: E,
    config: RwLock<EnvConfig>,
    db_config: RwLock<DatabaseConfig>,
    /// Present iff the environment is open. Beginning a transaction clones
    /// the handle out, so the lock is never held across an engine call.
    handle: RwLock<Option<Arc<E::Env>>>,
    /// Innermost active transaction, per thread.
    current: Mutex<HashMap<ThreadId, Arc<Transaction<E>>>>,
    next_txn_id: AtomicU64,
}

impl<E: Engine> EnvironmentInner<E> {
    pub(crate) const fn engine(&self) -> &E {
        &self.engine
    }

    /// Makes `txn` the calling thread's current transaction.
    pub(crate) fn set_current(&self, txn: Option<Arc<Transaction<E>>>) {
        let thread = thread::current().id();
        let mut current = self.current.lock();
        match txn {
            Some(txn) => current.insert(thread, txn),
            None => current.remove(&thread),
        };
    }

    fn current(&self) -> Option<Arc<Transaction<E>>> {
        self.current.lock().get(&thread::current().id()).cloned()
    }

    fn native(&self) -> Option<Arc<E::Env>> {
        self.handle.read_recursive().clone()
    }
}

impl<E: Engine> Drop for EnvironmentInner<E> {
    fn drop(&mut self) {
        if let Some(env) = self.handle.get_mut().take()
            && let Ok(env) = Arc::try_unwrap(env)
            && let Err(err) = self.engine.close(env)
        {
            warn!(target: "docenv", path = %self.path.display(), %err, "failed to close environment on drop");
        }
    }
}

/// An environment: one storage path, its native engine handle, and the
/// transactions running against it.
///
/// The environment is created closed. [`Environment::open`] allocates the
/// native handle on first call and is a no-op afterwards;
/// [`Environment::close`] releases it and may be called any number of times.
/// Dropping the last clone of an open environment closes it.
///
/// Units of work run through [`Environment::transaction`]. Every thread has
/// its own chain of nested transactions, so clones of one environment may be
/// used freely from several threads.
pub struct Environment<E: Engine = Mdbx> {
    inner: Arc<EnvironmentInner<E>>,
}

impl<E: Engine> Clone for Environment<E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<E: Engine> fmt::Debug for Environment<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("path", &self.inner.path)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl Environment {
    /// Creates a closed libmdbx environment for `path` with the default
    /// configuration.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self::builder().build(path)
    }

    /// Creates a builder for a libmdbx environment.
    pub fn builder() -> EnvironmentBuilder {
        EnvironmentBuilder::default()
    }
}

impl<E: Engine> Environment<E> {
    /// Creates a closed environment for `path` on top of `engine`, with the
    /// default configuration.
    pub fn with_engine(path: impl AsRef<Path>, engine: E) -> Self {
        Self::from_parts(
            path.as_ref().to_path_buf(),
            engine,
            EnvironmentFlags::default(),
            EnvConfig::default(),
            DatabaseConfig::default(),
        )
    }

    fn from_parts(
        path: PathBuf,
        engine: E,
        flags: EnvironmentFlags,
        config: EnvConfig,
        db_config: DatabaseConfig,
    ) -> Self {
        Self {
            inner: Arc::new(EnvironmentInner {
                path,
                flags,
                engine,
                config: RwLock::new(config),
                db_config: RwLock::new(db_config),
                handle: RwLock::new(None),
                current: Mutex::new(HashMap::new()),
                next_txn_id: AtomicU64::new(1),
            }),
        }
    }

    /// The storage path.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// The capabilities requested at open.
    pub fn flags(&self) -> EnvironmentFlags {
        self.inner.flags
    }

    /// The engine backing this environment.
    pub fn engine(&self) -> &E {
        &self.inner.engine
    }

    /// Returns `true` if the native handle is allocated.
    pub fn is_open(&self) -> bool {
        self.inner.handle.read_recursive().is_some()
    }

    /// The environment configuration that the next [`open`](Self::open)
    /// applies.
    pub fn config(&self) -> EnvConfig {
        *self.inner.config.read()
    }

    /// Merges `overrides` into the environment configuration and returns the
    /// merged result.
    ///
    /// An open environment keeps the configuration it was opened with;
    /// changes apply from the next open.
    pub fn configure(&self, overrides: &ConfigOverrides) -> EnvConfig {
        *self.inner.config.write().configure(overrides)
    }

    /// Per-database options for collaborators creating databases.
    pub fn database_config(&self) -> DatabaseConfig {
        self.inner.db_config.read().clone()
    }

    /// Merges `overrides` into the per-database options and returns the
    /// merged result.
    pub fn configure_database<I, K, V>(&self, overrides: I) -> DatabaseConfig
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<ConfigValue>,
    {
        self.inner.db_config.write().configure(overrides).clone()
    }

    /// Executes `f` with the native environment handle, if open.
    pub fn with_native<F, R>(&self, f: F) -> EngineResult<R>
    where
        F: FnOnce(&E::Env) -> R,
    {
        let handle = self.inner.handle.read_recursive();
        handle.as_deref().map(f).ok_or(EngineError::EnvironmentClosed)
    }

    /// Opens the environment. Calling this on an open environment does
    /// nothing.
    pub fn open(&self) -> EngineResult<()> {
        if self.is_open() {
            return Ok(());
        }

        let mut handle = self.inner.handle.write();
        if handle.is_some() {
            return Ok(());
        }

        let config = self.config();
        let env = self.inner.engine.open(&self.inner.path, self.inner.flags, &config)?;
        *handle = Some(Arc::new(env));

        debug!(
            target: "docenv",
            path = %self.inner.path.display(),
            max_locks = config.max_locks(),
            lock_timeout = ?config.lock_timeout(),
            txn_timeout = ?config.txn_timeout(),
            cache_size = config.cache_size(),
            "opened environment"
        );
        Ok(())
    }

    /// Closes the environment. Calling this on a closed environment does
    /// nothing.
    ///
    /// This is the one case where `close` does not leave the environment
    /// closed. Transactions are never aborted implicitly: while a transaction
    /// is in flight or being begun on *any* thread, this fails with
    /// [`EngineError::TransactionsOutstanding`] and the environment stays
    /// open. A unit of work running on one thread therefore makes `close`
    /// fail on every other thread until it finishes.
    pub fn close(&self) -> EngineResult<()> {
        let mut handle = self.inner.handle.write();
        let Some(env) = handle.take() else {
            return Ok(());
        };

        // A begin in progress holds a clone of the handle. It registers its
        // transaction before dropping the clone, so once the handle is
        // unique the map below is complete.
        let env = match Arc::try_unwrap(env) {
            Ok(env) => env,
            Err(env) => {
                *handle = Some(env);
                warn!(target: "docenv", "refusing to close environment while a transaction begins");
                return Err(EngineError::TransactionsOutstanding);
            }
        };

        let outstanding = self.inner.current.lock().len();
        if outstanding > 0 {
            *handle = Some(Arc::new(env));
            warn!(target: "docenv", outstanding, "refusing to close environment with transactions in flight");
            return Err(EngineError::TransactionsOutstanding);
        }

        self.inner.engine.close(env)?;
        debug!(target: "docenv", path = %self.inner.path.display(), "closed environment");
        Ok(())
    }

    /// The calling thread's current transaction, if a unit of work is
    /// running.
    ///
    /// Collaborators use this to reach the ambient transaction, e.g. to hand
    /// its native handle to engine get/put calls.
    pub fn current_transaction(&self) -> Option<Arc<Transaction<E>>> {
        self.inner.current()
    }

    /// Runs `f` inside a transaction.
    ///
    /// If the calling thread has no current transaction, a top-level one is
    /// begun; otherwise the new transaction is nested under the current one.
    /// The new transaction is current while `f` runs. When `f` returns `Ok`,
    /// the transaction commits; when it returns `Err` or panics, the
    /// transaction aborts. Either way the previous transaction is current
    /// again afterwards.
    ///
    /// The error returned by `f` is passed through unchanged. Engine
    /// failures while beginning or committing are converted with
    /// `From<EngineError>`.
    pub fn transaction<F, R, Err>(&self, f: F) -> Result<R, Err>
    where
        F: FnOnce(&Transaction<E>) -> Result<R, Err>,
        Err: From<EngineError>,
    {
        let scope = self.begin_scope()?;
        let span = scope.transaction().span().clone();
        let _guard = span.enter();

        match f(scope.transaction()) {
            Ok(value) => {
                scope.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(abort_err) = scope.abort() {
                    warn!(target: "docenv", %abort_err, "abort failed");
                }
                Err(err)
            }
        }
    }

    fn begin_scope(&self) -> EngineResult<TxnScope<'_, E>> {
        let inner = &*self.inner;
        // The handle lock is released here. A top-level begin may wait for
        // the engine's writer lock, and other threads must still be able to
        // open, close or inspect the environment meanwhile.
        let env = inner.native().ok_or(EngineError::EnvironmentClosed)?;

        let parent = inner.current();
        let native = match &parent {
            Some(parent) => parent.with_native(|p| inner.engine.begin(&env, Some(p)))??,
            None => inner.engine.begin(&env, None)?,
        };

        let id = inner.next_txn_id.fetch_add(1, Ordering::Relaxed);
        let txn = Arc::new(Transaction::new(id, parent, native));
        inner.set_current(Some(Arc::clone(&txn)));
        drop(env);

        Ok(TxnScope::new(inner, txn))
    }
}

/// Options for an [`Environment`].
#[derive(Debug, Clone)]
pub struct EnvironmentBuilder<E = Mdbx> {
    engine: E,
    flags: EnvironmentFlags,
    config: EnvConfig,
    db_config: DatabaseConfig,
}

impl Default for EnvironmentBuilder {
    fn default() -> Self {
        Self {
            engine: Mdbx,
            flags: EnvironmentFlags::default(),
            config: EnvConfig::default(),
            db_config: DatabaseConfig::default(),
        }
    }
}

impl<E: Engine + Clone> EnvironmentBuilder<E> {
    /// Uses `engine` instead of the current one.
    pub fn with_engine<E2: Engine + Clone>(self, engine: E2) -> EnvironmentBuilder<E2> {
        EnvironmentBuilder {
            engine,
            flags: self.flags,
            config: self.config,
            db_config: self.db_config,
        }
    }

    /// Sets the capability flags.
    pub fn set_flags(&mut self, flags: EnvironmentFlags) -> &mut Self {
        self.flags = flags;
        self
    }

    /// Replaces the environment configuration.
    pub fn set_config(&mut self, config: EnvConfig) -> &mut Self {
        self.config = config;
        self
    }

    /// Merges `overrides` into the environment configuration.
    pub fn configure(&mut self, overrides: &ConfigOverrides) -> &mut Self {
        self.config.configure(overrides);
        self
    }

    /// Merges `overrides` into the per-database options.
    pub fn configure_database<I, K, V>(&mut self, overrides: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<ConfigValue>,
    {
        self.db_config.configure(overrides);
        self
    }

    /// Creates a closed environment for `path`.
    pub fn build(&self, path: impl AsRef<Path>) -> Environment<E> {
        Environment::from_parts(
            path.as_ref().to_path_buf(),
            self.engine.clone(),
            self.flags,
            self.config,
            self.db_config.clone(),
        )
    }

    /// Creates and opens an environment for `path`.
    pub fn open(&self, path: impl AsRef<Path>) -> EngineResult<Environment<E>> {
        let env = self.build(path);
        env.open()?;
        Ok(env)
    }
}
