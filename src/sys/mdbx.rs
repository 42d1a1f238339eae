use crate::{
    EngineError, EngineResult, EnvConfig, EnvironmentFlags, error::mdbx_result, sys::Engine,
};
use std::{
    ffi::CString,
    fmt,
    path::Path,
    ptr,
    thread::sleep,
    time::{Duration, Instant},
};
use tracing::{debug, warn};

/// Page size assumed when converting the cache size into pages.
const PAGE_SIZE: u64 = 4096;

/// Pause between attempts to take the writer lock.
const BUSY_BACKOFF: Duration = Duration::from_millis(10);

/// The libmdbx engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mdbx;

/// An open libmdbx environment.
pub struct MdbxEnv {
    ptr: *mut ffi::MDBX_env,
    lock_timeout: Duration,
    txn_timeout: Duration,
}

// SAFETY: libmdbx environment handles may be used from any thread.
unsafe impl Send for MdbxEnv {}

// SAFETY: libmdbx environment handles may be used from any thread.
unsafe impl Sync for MdbxEnv {}

impl fmt::Debug for MdbxEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MdbxEnv")
            .field("lock_timeout", &self.lock_timeout)
            .field("txn_timeout", &self.txn_timeout)
            .finish_non_exhaustive()
    }
}

impl MdbxEnv {
    /// Returns the raw environment pointer.
    ///
    /// The pointer is valid until the environment is closed.
    #[inline]
    pub const fn env_ptr(&self) -> *mut ffi::MDBX_env {
        self.ptr
    }

    /// How long a top-level transaction waits for the writer lock.
    pub const fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// How long a transaction may live before its commit is refused.
    pub const fn txn_timeout(&self) -> Duration {
        self.txn_timeout
    }

    fn close_inner(&mut self) -> EngineResult<()> {
        let ptr = std::mem::replace(&mut self.ptr, ptr::null_mut());
        if ptr.is_null() {
            return Ok(());
        }
        // SAFETY: the pointer came from `mdbx_env_create` and is closed once.
        mdbx_result(unsafe { ffi::mdbx_env_close_ex(ptr, false) }).map(|_| ())
    }
}

impl Drop for MdbxEnv {
    fn drop(&mut self) {
        if let Err(err) = self.close_inner() {
            warn!(target: "docenv", %err, "failed to close environment");
        }
    }
}

/// A libmdbx read-write transaction.
///
/// Aborted on drop unless it was committed or aborted through [`Mdbx`].
pub struct MdbxTxn {
    ptr: *mut ffi::MDBX_txn,
    started: Instant,
    timeout: Duration,
}

// SAFETY: the environment layer only commits or aborts a transaction on the
// thread that began it, and rejects native access from other threads.
unsafe impl Send for MdbxTxn {}

impl fmt::Debug for MdbxTxn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MdbxTxn").field("started", &self.started).finish_non_exhaustive()
    }
}

impl MdbxTxn {
    /// Returns the raw transaction pointer, for use with the `ffi` get/put
    /// calls.
    #[inline]
    pub const fn txn_ptr(&self) -> *mut ffi::MDBX_txn {
        self.ptr
    }

    /// Returns the engine's transaction id, or 0 if the transaction is no
    /// longer valid.
    pub fn id(&self) -> u64 {
        // SAFETY: the pointer is valid until the transaction is finished,
        // which consumes `self`.
        unsafe { ffi::mdbx_txn_id(self.ptr) }
    }

    fn take(&mut self) -> *mut ffi::MDBX_txn {
        std::mem::replace(&mut self.ptr, ptr::null_mut())
    }

    fn expired(&self) -> bool {
        !self.timeout.is_zero() && self.started.elapsed() > self.timeout
    }
}

impl Drop for MdbxTxn {
    fn drop(&mut self) {
        let ptr = self.take();
        if !ptr.is_null() {
            // SAFETY: the transaction was never finished.
            unsafe { ffi::mdbx_txn_abort(ptr) };
            debug!(target: "docenv", "aborted unfinished transaction");
        }
    }
}

#[cfg(unix)]
fn path_to_cstring(path: &Path) -> EngineResult<CString> {
    use std::os::unix::ffi::OsStrExt;
    CString::new(path.as_os_str().as_bytes()).map_err(|_| EngineError::from_err_code(libc::EINVAL))
}

#[cfg(not(unix))]
fn path_to_cstring(path: &Path) -> EngineResult<CString> {
    let path = path.to_str().ok_or(EngineError::from_err_code(libc::EINVAL))?;
    CString::new(path).map_err(|_| EngineError::from_err_code(libc::EINVAL))
}

fn io_error(err: std::io::Error) -> EngineError {
    err.raw_os_error().map_or(EngineError::Problem, EngineError::from_err_code)
}

/// Begins a read-write transaction.
///
/// # Safety
///
/// `env` must be an open environment and `parent` null or a live
/// transaction of `env`.
unsafe fn begin_raw(
    env: *mut ffi::MDBX_env,
    parent: *mut ffi::MDBX_txn,
    flags: ffi::MDBX_txn_flags_t,
) -> EngineResult<*mut ffi::MDBX_txn> {
    let mut txn: *mut ffi::MDBX_txn = ptr::null_mut();
    // SAFETY: upheld by the caller.
    mdbx_result(unsafe { ffi::mdbx_txn_begin_ex(env, parent, flags, &mut txn, ptr::null_mut()) })?;
    Ok(txn)
}

impl Mdbx {
    /// Takes the writer lock without blocking, retrying until the lock
    /// timeout elapses. A zero timeout blocks until the lock is granted.
    fn begin_top_level(env: &MdbxEnv) -> EngineResult<*mut ffi::MDBX_txn> {
        let deadline =
            Some(env.lock_timeout).filter(|t| !t.is_zero()).and_then(|t| Instant::now().checked_add(t));
        let Some(deadline) = deadline else {
            // SAFETY: `env` is open.
            return unsafe { begin_raw(env.ptr, ptr::null_mut(), ffi::MDBX_TXN_READWRITE) };
        };

        let mut warned = false;
        loop {
            // SAFETY: `env` is open.
            let res = unsafe {
                begin_raw(env.ptr, ptr::null_mut(), ffi::MDBX_TXN_READWRITE | ffi::MDBX_TXN_TRY)
            };
            if !matches!(res, Err(EngineError::Busy)) {
                return res;
            }

            let now = Instant::now();
            if now >= deadline {
                return res;
            }
            if !warned {
                warned = true;
                warn!(target: "docenv", "Process stalled, awaiting read-write transaction lock.");
            }
            sleep(BUSY_BACKOFF.min(deadline - now));
        }
    }
}

impl Engine for Mdbx {
    type Env = MdbxEnv;
    type Txn = MdbxTxn;

    fn open(&self, path: &Path, flags: EnvironmentFlags, config: &EnvConfig) -> EngineResult<MdbxEnv> {
        if !flags.contains(EnvironmentFlags::SUBSYSTEMS) {
            return Err(EngineError::Incompatible);
        }
        if flags.contains(EnvironmentFlags::CREATE) {
            std::fs::create_dir_all(path).map_err(io_error)?;
        }
        let c_path = path_to_cstring(path)?;

        let mut env = MdbxEnv {
            ptr: ptr::null_mut(),
            lock_timeout: config.lock_timeout(),
            txn_timeout: config.txn_timeout(),
        };
        // SAFETY: `env.ptr` is a valid out-pointer. From here on, dropping
        // `env` releases the handle.
        mdbx_result(unsafe { ffi::mdbx_env_create(&mut env.ptr) })?;

        for (option, value) in [
            (ffi::MDBX_opt_max_readers, config.max_locks()),
            (ffi::MDBX_opt_max_db, config.max_dbs()),
            (ffi::MDBX_opt_dp_reserve_limit, (config.cache_size() / PAGE_SIZE).max(1)),
        ] {
            // SAFETY: the environment is created but not yet open.
            mdbx_result(unsafe { ffi::mdbx_env_set_option(env.ptr, option, value) })?;
        }

        // SAFETY: the environment is configured and `c_path` outlives the call.
        mdbx_result(unsafe {
            ffi::mdbx_env_open(env.ptr, c_path.as_ptr(), flags.mdbx_flags(), 0o644)
        })?;

        debug!(target: "docenv", path = %path.display(), ?flags, "opened mdbx environment");
        Ok(env)
    }

    fn close(&self, mut env: MdbxEnv) -> EngineResult<()> {
        env.close_inner()
    }

    fn begin(&self, env: &MdbxEnv, parent: Option<&MdbxTxn>) -> EngineResult<MdbxTxn> {
        let ptr = match parent {
            // SAFETY: `env` is open and `parent` is a live transaction of it.
            Some(parent) => unsafe {
                begin_raw(env.ptr, parent.txn_ptr(), ffi::MDBX_TXN_READWRITE)?
            },
            None => Self::begin_top_level(env)?,
        };
        Ok(MdbxTxn { ptr, started: Instant::now(), timeout: env.txn_timeout })
    }

    fn commit(&self, mut txn: MdbxTxn) -> EngineResult<()> {
        if txn.expired() {
            self.abort(txn)?;
            return Err(EngineError::TransactionTimeout);
        }

        let ptr = txn.take();
        // SAFETY: the transaction is live and is finished exactly once.
        let botched = mdbx_result(unsafe { ffi::mdbx_txn_commit_ex(ptr, ptr::null_mut()) })?;
        if botched {
            warn!(target: "docenv", "commit aborted the transaction instead");
            return Err(EngineError::BotchedTransaction);
        }
        Ok(())
    }

    fn abort(&self, mut txn: MdbxTxn) -> EngineResult<()> {
        let ptr = txn.take();
        // SAFETY: the transaction is live and is finished exactly once.
        mdbx_result(unsafe { ffi::mdbx_txn_abort(ptr) }).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConfigOverrides;
    use tempfile::tempdir;

    fn open(path: &Path, overrides: ConfigOverrides) -> MdbxEnv {
        let mut config = EnvConfig::default();
        config.configure(&overrides);
        Mdbx.open(path, EnvironmentFlags::default(), &config).unwrap()
    }

    #[test]
    fn open_and_close() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("env");
        let env = open(&path, ConfigOverrides::new());
        assert!(!env.env_ptr().is_null());
        assert!(path.is_dir());
        Mdbx.close(env).unwrap();
    }

    #[test]
    fn missing_subsystem_is_incompatible() {
        let dir = tempdir().unwrap();
        let flags = EnvironmentFlags::default() - EnvironmentFlags::INIT_LOG;
        let err = Mdbx.open(dir.path(), flags, &EnvConfig::default()).unwrap_err();
        assert_eq!(err, EngineError::Incompatible);
    }

    #[test]
    fn nested_commit_and_abort() {
        let dir = tempdir().unwrap();
        let env = open(dir.path(), ConfigOverrides::new());

        let outer = Mdbx.begin(&env, None).unwrap();
        assert_ne!(outer.id(), 0);

        let inner = Mdbx.begin(&env, Some(&outer)).unwrap();
        Mdbx.commit(inner).unwrap();

        let inner = Mdbx.begin(&env, Some(&outer)).unwrap();
        Mdbx.abort(inner).unwrap();

        Mdbx.commit(outer).unwrap();
        Mdbx.close(env).unwrap();
    }

    #[test]
    fn dropped_txn_releases_writer_lock() {
        let dir = tempdir().unwrap();
        let env = open(dir.path(), ConfigOverrides::new().lock_timeout(Duration::from_millis(50)));

        drop(Mdbx.begin(&env, None).unwrap());
        let txn = Mdbx.begin(&env, None).unwrap();
        Mdbx.commit(txn).unwrap();
    }

    #[test]
    fn busy_writer_lock_times_out() {
        let dir = tempdir().unwrap();
        let env = open(dir.path(), ConfigOverrides::new().lock_timeout(Duration::from_millis(50)));

        let holder = Mdbx.begin(&env, None).unwrap();
        let (err, waited) = std::thread::scope(|s| {
            s.spawn(|| {
                let started = Instant::now();
                let err = Mdbx.begin(&env, None).and_then(|txn| Mdbx.abort(txn)).err();
                (err, started.elapsed())
            })
            .join()
            .unwrap()
        });
        assert_eq!(err, Some(EngineError::Busy));
        assert!(waited >= Duration::from_millis(50));

        Mdbx.abort(holder).unwrap();
    }

    #[test]
    fn zero_lock_timeout_waits_for_writer() {
        let dir = tempdir().unwrap();
        let env = open(dir.path(), ConfigOverrides::new().lock_timeout(Duration::ZERO));

        let holder = Mdbx.begin(&env, None).unwrap();
        let waited = std::thread::scope(|s| {
            let waiter = s.spawn(|| {
                let started = Instant::now();
                let txn = Mdbx.begin(&env, None).unwrap();
                let waited = started.elapsed();
                Mdbx.commit(txn).unwrap();
                waited
            });
            sleep(Duration::from_millis(100));
            Mdbx.abort(holder).unwrap();
            waiter.join().unwrap()
        });
        assert!(waited >= Duration::from_millis(50));
    }

    #[test]
    fn zero_txn_timeout_never_expires() {
        let dir = tempdir().unwrap();
        let env = open(dir.path(), ConfigOverrides::new().txn_timeout(Duration::ZERO));

        let txn = Mdbx.begin(&env, None).unwrap();
        sleep(Duration::from_millis(5));
        Mdbx.commit(txn).unwrap();
    }

    #[test]
    fn expired_txn_is_aborted_at_commit() {
        let dir = tempdir().unwrap();
        let env = open(dir.path(), ConfigOverrides::new().txn_timeout(Duration::from_micros(1)));

        let txn = Mdbx.begin(&env, None).unwrap();
        sleep(Duration::from_millis(5));
        assert_eq!(Mdbx.commit(txn), Err(EngineError::TransactionTimeout));

        // The writer lock was released by the abort.
        let txn = Mdbx.begin(&env, None).unwrap();
        Mdbx.abort(txn).unwrap();
    }
}
