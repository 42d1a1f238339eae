use std::ffi::c_int;

/// Codes for the statuses this layer raises itself. They sit below the
/// libmdbx error range so that they survive a round trip through
/// [`EngineError::to_err_code`] and [`EngineError::from_err_code`].
const BOTCHED_TRANSACTION: c_int = -30_900;
const ENVIRONMENT_CLOSED: c_int = -30_901;
const TRANSACTION_FINISHED: c_int = -30_902;
const TRANSACTIONS_OUTSTANDING: c_int = -30_903;
const TRANSACTION_TIMEOUT: c_int = -30_904;

/// An engine result.
pub type EngineResult<T> = Result<T, EngineError>;

/// How the error taxonomy treats an [`EngineError`].
///
/// See [`Translator`](crate::Translator) for the mapping into
/// [`DocError`](crate::DocError).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    /// The environment is damaged and must be recovered offline.
    RunRecovery,
    /// The engine detected a deadlock.
    Deadlock,
    /// A lock was not granted in time.
    LockNotGranted,
    /// The key already exists.
    KeyExist,
    /// Any other engine failure.
    Other,
}

/// An engine status, as reported by libmdbx or by this layer on top of it.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    /// Key/data pair already exists.
    #[error("key/data pair already exists")]
    KeyExist,
    /// No matching key/data pair found.
    #[error("no matching key/data pair found")]
    NotFound,
    /// The requested page was not found.
    #[error("requested page not found")]
    PageNotFound,
    /// Database is corrupted.
    #[error("database is corrupted")]
    Corrupted,
    /// Environment had a fatal error.
    #[error("environment had fatal error")]
    Panic,
    /// DB version mismatch.
    #[error("DB version mismatch")]
    VersionMismatch,
    /// File is not an MDBX file.
    #[error("file is not an MDBX file")]
    Invalid,
    /// Environment map size limit reached.
    #[error("environment map size limit reached")]
    MapFull,
    /// Too many DBI-handles.
    #[error("too many DBI-handles (maxdbs reached)")]
    DbsFull,
    /// Too many readers.
    #[error("too many readers (maxreaders reached)")]
    ReadersFull,
    /// Transaction has too many dirty pages.
    #[error("transaction has too many dirty pages (i.e too big)")]
    TxnFull,
    /// Cursor stack limit reached.
    #[error("cursor stack limit reached")]
    CursorFull,
    /// Page has no more space.
    #[error("page has no more space")]
    PageFull,
    /// The map could not be extended.
    #[error("database engine was unable to extend mapping")]
    UnableExtendMapSize,
    /// Environment or database is not compatible with the requested operation
    /// or flags.
    #[error("environment or database is not compatible with the requested operation or flags")]
    Incompatible,
    /// Invalid reuse of reader locktable slot.
    #[error("invalid reuse of reader locktable slot")]
    BadRslot,
    /// Transaction is not valid for requested operation.
    #[error("transaction is not valid for requested operation")]
    BadTxn,
    /// Invalid size or alignment of key or data.
    #[error("invalid size or alignment of key or data for the target database")]
    BadValSize,
    /// The specified DBI-handle is invalid.
    #[error("the specified DBI-handle is invalid")]
    BadDbi,
    /// Unexpected internal error.
    #[error("unexpected internal error")]
    Problem,
    /// Another write transaction is running.
    #[error("another write transaction is running or environment is already used")]
    Busy,
    /// The environment needs recovery.
    #[error("environment needs recovery")]
    WannaRecovery,
    /// A deadlock was detected.
    #[error("resource deadlock would occur")]
    Deadlock,
    /// A lock wait timed out.
    #[error("lock wait timed out")]
    TimedOut,
    /// Permission denied.
    #[error("permission denied to setup database")]
    Access,
    /// Database is too large for the current system.
    #[error("database is too large for the current system")]
    TooLarge,
    /// A thread has attempted to use a transaction it does not own.
    #[error("transaction is owned by another thread")]
    ThreadMismatch,
    /// Overlapping read and write transactions for the current thread.
    #[error("overlapping read and write transactions for the current thread")]
    TxnOverlapping,
    /// The engine committed nothing and aborted the transaction instead.
    #[error("transaction was aborted instead of being committed")]
    BotchedTransaction,
    /// The environment is not open.
    #[error("environment is not open")]
    EnvironmentClosed,
    /// The transaction has already been committed or aborted.
    #[error("transaction has already been committed or aborted")]
    TransactionFinished,
    /// The environment still has transactions in flight.
    #[error("environment has outstanding transactions")]
    TransactionsOutstanding,
    /// The transaction lived longer than the configured transaction timeout.
    #[error("transaction exceeded its timeout and was aborted")]
    TransactionTimeout,
    /// Unknown error code.
    #[error("unknown error code: {0}")]
    Other(i32),
}

impl EngineError {
    /// Converts a raw error code to an [`EngineError`].
    pub const fn from_err_code(err_code: c_int) -> Self {
        match err_code {
            ffi::MDBX_KEYEXIST => Self::KeyExist,
            ffi::MDBX_NOTFOUND | ffi::MDBX_ENODATA => Self::NotFound,
            ffi::MDBX_PAGE_NOTFOUND => Self::PageNotFound,
            ffi::MDBX_CORRUPTED => Self::Corrupted,
            ffi::MDBX_PANIC => Self::Panic,
            ffi::MDBX_VERSION_MISMATCH => Self::VersionMismatch,
            ffi::MDBX_INVALID => Self::Invalid,
            ffi::MDBX_MAP_FULL => Self::MapFull,
            ffi::MDBX_DBS_FULL => Self::DbsFull,
            ffi::MDBX_READERS_FULL => Self::ReadersFull,
            ffi::MDBX_TXN_FULL => Self::TxnFull,
            ffi::MDBX_CURSOR_FULL => Self::CursorFull,
            ffi::MDBX_PAGE_FULL => Self::PageFull,
            ffi::MDBX_UNABLE_EXTEND_MAPSIZE => Self::UnableExtendMapSize,
            ffi::MDBX_INCOMPATIBLE => Self::Incompatible,
            ffi::MDBX_BAD_RSLOT => Self::BadRslot,
            ffi::MDBX_BAD_TXN => Self::BadTxn,
            ffi::MDBX_BAD_VALSIZE => Self::BadValSize,
            ffi::MDBX_BAD_DBI => Self::BadDbi,
            ffi::MDBX_PROBLEM => Self::Problem,
            ffi::MDBX_BUSY => Self::Busy,
            ffi::MDBX_WANNA_RECOVERY => Self::WannaRecovery,
            ffi::MDBX_TOO_LARGE => Self::TooLarge,
            ffi::MDBX_THREAD_MISMATCH => Self::ThreadMismatch,
            ffi::MDBX_TXN_OVERLAPPING => Self::TxnOverlapping,
            BOTCHED_TRANSACTION => Self::BotchedTransaction,
            ENVIRONMENT_CLOSED => Self::EnvironmentClosed,
            TRANSACTION_FINISHED => Self::TransactionFinished,
            TRANSACTIONS_OUTSTANDING => Self::TransactionsOutstanding,
            TRANSACTION_TIMEOUT => Self::TransactionTimeout,
            libc::EDEADLK => Self::Deadlock,
            libc::ETIMEDOUT => Self::TimedOut,
            libc::EACCES => Self::Access,
            other => Self::Other(other),
        }
    }

    /// Converts an [`EngineError`] to the raw error code.
    pub const fn to_err_code(&self) -> i32 {
        match self {
            Self::KeyExist => ffi::MDBX_KEYEXIST,
            Self::NotFound => ffi::MDBX_NOTFOUND,
            Self::PageNotFound => ffi::MDBX_PAGE_NOTFOUND,
            Self::Corrupted => ffi::MDBX_CORRUPTED,
            Self::Panic => ffi::MDBX_PANIC,
            Self::VersionMismatch => ffi::MDBX_VERSION_MISMATCH,
            Self::Invalid => ffi::MDBX_INVALID,
            Self::MapFull => ffi::MDBX_MAP_FULL,
            Self::DbsFull => ffi::MDBX_DBS_FULL,
            Self::ReadersFull => ffi::MDBX_READERS_FULL,
            Self::TxnFull => ffi::MDBX_TXN_FULL,
            Self::CursorFull => ffi::MDBX_CURSOR_FULL,
            Self::PageFull => ffi::MDBX_PAGE_FULL,
            Self::UnableExtendMapSize => ffi::MDBX_UNABLE_EXTEND_MAPSIZE,
            Self::Incompatible => ffi::MDBX_INCOMPATIBLE,
            Self::BadRslot => ffi::MDBX_BAD_RSLOT,
            Self::BadTxn => ffi::MDBX_BAD_TXN,
            Self::BadValSize => ffi::MDBX_BAD_VALSIZE,
            Self::BadDbi => ffi::MDBX_BAD_DBI,
            Self::Problem => ffi::MDBX_PROBLEM,
            Self::Busy => ffi::MDBX_BUSY,
            Self::WannaRecovery => ffi::MDBX_WANNA_RECOVERY,
            Self::Deadlock => libc::EDEADLK,
            Self::TimedOut => libc::ETIMEDOUT,
            Self::Access => libc::EACCES,
            Self::TooLarge => ffi::MDBX_TOO_LARGE,
            Self::ThreadMismatch => ffi::MDBX_THREAD_MISMATCH,
            Self::TxnOverlapping => ffi::MDBX_TXN_OVERLAPPING,
            Self::BotchedTransaction => BOTCHED_TRANSACTION,
            Self::EnvironmentClosed => ENVIRONMENT_CLOSED,
            Self::TransactionFinished => TRANSACTION_FINISHED,
            Self::TransactionsOutstanding => TRANSACTIONS_OUTSTANDING,
            Self::TransactionTimeout => TRANSACTION_TIMEOUT,
            Self::Other(err_code) => *err_code,
        }
    }

    /// Returns the numeric status code carried by this error.
    #[inline]
    pub const fn code(&self) -> i32 {
        self.to_err_code()
    }

    /// Classifies the error for the taxonomy translator.
    pub const fn condition(&self) -> Condition {
        match self {
            Self::Panic | Self::WannaRecovery | Self::Corrupted | Self::PageNotFound => {
                Condition::RunRecovery
            }
            Self::Deadlock => Condition::Deadlock,
            Self::Busy | Self::TimedOut | Self::TransactionTimeout => Condition::LockNotGranted,
            Self::KeyExist => Condition::KeyExist,
            _ => Condition::Other,
        }
    }
}

impl From<EngineError> for i32 {
    fn from(value: EngineError) -> Self {
        value.to_err_code()
    }
}

/// Parse an MDBX error code into a result type.
///
/// `MDBX_SUCCESS` maps to `Ok(false)` and `MDBX_RESULT_TRUE` to `Ok(true)`.
#[inline]
pub(crate) const fn mdbx_result(err_code: c_int) -> EngineResult<bool> {
    match err_code {
        ffi::MDBX_SUCCESS => Ok(false),
        ffi::MDBX_RESULT_TRUE => Ok(true),
        other => Err(EngineError::from_err_code(other)),
    }
}
