//! Caller-facing error taxonomy.
//!
//! Engine statuses are many and engine specific. Callers only need to decide
//! between retrying, giving up and reporting, so [`Translator`] folds every
//! [`EngineError`] into one of five [`ErrorKind`]s. `Deadlock` and `Timeout`
//! are retryable, the rest are not.
//!
//! One status is not an error at all: an environment that requires recovery
//! may already hold inconsistent data, and continuing to write makes it
//! worse. Translating such a status hands control to a [`FailStop`]
//! strategy, which by default terminates the process with
//! [`RUN_RECOVERY_EXIT_CODE`].

use crate::error::{Condition, EngineError};
use std::{backtrace::Backtrace, error::Error as StdError, fmt, sync::Arc};
use tracing::error;

/// Exit status used when the environment requires recovery.
pub const RUN_RECOVERY_EXIT_CODE: i32 = 9;

/// A boxed, thread-safe error of any type.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// A result carrying a [`DocError`].
pub type DocResult<T> = Result<T, DocError>;

/// The kind of a [`DocError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Catch-all storage failure.
    Error,
    /// A requested document does not exist. Raised by the mapping layer only.
    DocumentNotFound,
    /// A primary key collided with an existing one.
    DuplicatePrimaryKey,
    /// The engine detected a deadlock. Retry the unit of work.
    Deadlock,
    /// A lock was not granted in time. Retry or give up.
    Timeout,
}

impl ErrorKind {
    /// Whether retrying the unit of work may succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Deadlock | Self::Timeout)
    }
}

/// A storage error, independent of the engine that produced it.
#[derive(Debug, thiserror::Error)]
pub enum DocError {
    /// Catch-all storage failure.
    #[error("{message}")]
    Storage {
        /// Human-readable message.
        message: String,
        /// The engine status this error was translated from.
        #[source]
        origin: Option<EngineError>,
        /// Where the engine status was translated.
        trace: Arc<Backtrace>,
    },
    /// A requested document does not exist.
    #[error("{message}")]
    DocumentNotFound {
        /// Human-readable message.
        message: String,
    },
    /// A primary key collided with an existing one.
    #[error("{message}")]
    DuplicatePrimaryKey {
        /// Human-readable message, naming the key when known.
        message: String,
        /// The engine status this error was translated from.
        #[source]
        origin: Option<EngineError>,
        /// Where the engine status was translated.
        trace: Arc<Backtrace>,
    },
    /// The engine detected a deadlock.
    #[error("{message}")]
    Deadlock {
        /// Human-readable message.
        message: String,
        /// The engine status this error was translated from.
        #[source]
        origin: Option<EngineError>,
        /// Where the engine status was translated.
        trace: Arc<Backtrace>,
    },
    /// A lock was not granted in time.
    #[error("{message}")]
    Timeout {
        /// Human-readable message.
        message: String,
        /// The engine status this error was translated from.
        #[source]
        origin: Option<EngineError>,
        /// Where the engine status was translated.
        trace: Arc<Backtrace>,
    },
}

impl DocError {
    /// Creates a [`DocError::DocumentNotFound`]. The translator never
    /// produces this kind; the mapping layer raises it directly.
    pub fn document_not_found(message: impl Into<String>) -> Self {
        Self::DocumentNotFound { message: message.into() }
    }

    /// Creates a catch-all error that did not originate in the engine.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            origin: None,
            trace: Arc::new(Backtrace::capture()),
        }
    }

    /// Returns the kind of this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Storage { .. } => ErrorKind::Error,
            Self::DocumentNotFound { .. } => ErrorKind::DocumentNotFound,
            Self::DuplicatePrimaryKey { .. } => ErrorKind::DuplicatePrimaryKey,
            Self::Deadlock { .. } => ErrorKind::Deadlock,
            Self::Timeout { .. } => ErrorKind::Timeout,
        }
    }

    /// Whether retrying the unit of work may succeed.
    pub const fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// The engine status this error was translated from.
    pub const fn origin(&self) -> Option<&EngineError> {
        match self {
            Self::Storage { origin, .. }
            | Self::DuplicatePrimaryKey { origin, .. }
            | Self::Deadlock { origin, .. }
            | Self::Timeout { origin, .. } => origin.as_ref(),
            Self::DocumentNotFound { .. } => None,
        }
    }

    /// The backtrace captured when the engine status was translated.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self {
            Self::Storage { trace, .. }
            | Self::DuplicatePrimaryKey { trace, .. }
            | Self::Deadlock { trace, .. }
            | Self::Timeout { trace, .. } => Some(trace),
            Self::DocumentNotFound { .. } => None,
        }
    }
}

impl From<EngineError> for DocError {
    /// Translates with the default [`Translator`] and no key context.
    fn from(err: EngineError) -> Self {
        Translator::new().translate(err, None)
    }
}

/// Describes the model an operation was working on, to enrich messages.
pub trait KeyContext {
    /// A printable description of the model's primary key.
    fn primary_key(&self) -> String;
}

impl KeyContext for &str {
    fn primary_key(&self) -> String {
        (*self).to_owned()
    }
}

impl KeyContext for String {
    fn primary_key(&self) -> String {
        self.clone()
    }
}

/// What to do when the engine reports that the environment needs recovery.
pub trait FailStop: fmt::Debug + Send + Sync {
    /// Stops the current computation. Never returns.
    fn halt(&self, err: &EngineError) -> !;
}

/// Terminates the process with [`RUN_RECOVERY_EXIT_CODE`].
///
/// No destructors run and nothing else is written to the environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExitProcess;

impl FailStop for ExitProcess {
    fn halt(&self, err: &EngineError) -> ! {
        error!(
            target: "docenv",
            code = err.code(),
            %err,
            "environment requires recovery, terminating"
        );
        std::process::exit(RUN_RECOVERY_EXIT_CODE)
    }
}

impl<T: FailStop + ?Sized> FailStop for Arc<T> {
    fn halt(&self, err: &EngineError) -> ! {
        self.as_ref().halt(err)
    }
}

impl<T: FailStop + ?Sized> FailStop for Box<T> {
    fn halt(&self, err: &EngineError) -> ! {
        self.as_ref().halt(err)
    }
}

/// Translates engine statuses into [`DocError`]s.
#[derive(Debug, Clone, Default)]
pub struct Translator<F = ExitProcess> {
    fail_stop: F,
}

impl Translator {
    /// A translator with the default [`ExitProcess`] strategy.
    pub const fn new() -> Self {
        Self { fail_stop: ExitProcess }
    }
}

impl<F: FailStop> Translator<F> {
    /// A translator with a custom fail-stop strategy.
    pub const fn with_fail_stop(fail_stop: F) -> Self {
        Self { fail_stop }
    }

    /// Returns the fail-stop strategy.
    pub const fn fail_stop(&self) -> &F {
        &self.fail_stop
    }

    /// Translates an engine status.
    ///
    /// `context` is only used to name the offending key of a duplicate
    /// primary key. A status that requires recovery never returns.
    pub fn translate(&self, err: EngineError, context: Option<&dyn KeyContext>) -> DocError {
        let trace = Arc::new(Backtrace::capture());
        let origin = Some(err);
        match err.condition() {
            Condition::RunRecovery => self.fail_stop.halt(&err),
            Condition::Deadlock => {
                DocError::Deadlock { message: err.to_string(), origin, trace }
            }
            Condition::LockNotGranted => {
                DocError::Timeout { message: err.to_string(), origin, trace }
            }
            Condition::KeyExist => {
                let message = match context {
                    Some(model) => format!("primary key {:?} already exists", model.primary_key()),
                    None => format!("primary key already exists: {err}"),
                };
                DocError::DuplicatePrimaryKey { message, origin, trace }
            }
            Condition::Other => DocError::Storage { message: err.to_string(), origin, trace },
        }
    }

    /// Translates an arbitrary error.
    ///
    /// Errors that are not [`EngineError`]s are returned unchanged.
    pub fn translate_any(&self, err: BoxError, context: Option<&dyn KeyContext>) -> BoxError {
        match err.downcast::<EngineError>() {
            Ok(engine) => Box::new(self.translate(*engine, context)),
            Err(other) => other,
        }
    }
}

/// Translates an engine status with the default [`Translator`].
pub fn translate(err: EngineError, context: Option<&dyn KeyContext>) -> DocError {
    Translator::new().translate(err, context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{AssertUnwindSafe, catch_unwind};

    #[derive(Debug)]
    struct Unwind;

    impl FailStop for Unwind {
        fn halt(&self, err: &EngineError) -> ! {
            panic!("halted on {}", err.code())
        }
    }

    struct User;

    impl KeyContext for User {
        fn primary_key(&self) -> String {
            "user:42".to_owned()
        }
    }

    #[test]
    fn deadlock() {
        let err = translate(EngineError::Deadlock, None);
        assert_eq!(err.kind(), ErrorKind::Deadlock);
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), EngineError::Deadlock.to_string());
    }

    #[test]
    fn lock_not_granted() {
        let err = translate(EngineError::Busy, None);
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.is_retryable());
        assert_eq!(translate(EngineError::TimedOut, None).kind(), ErrorKind::Timeout);
    }

    #[test]
    fn duplicate_primary_key() {
        let err = translate(EngineError::KeyExist, Some(&User));
        assert_eq!(err.kind(), ErrorKind::DuplicatePrimaryKey);
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("user:42"), "{err}");

        let err = translate(EngineError::KeyExist, Some(&"id"));
        assert_eq!(err.to_string(), "primary key \"id\" already exists");

        let err = translate(EngineError::KeyExist, None);
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn catch_all() {
        let err = translate(EngineError::MapFull, None);
        assert_eq!(err.kind(), ErrorKind::Error);
        assert_eq!(err.to_string(), "environment map size limit reached");
        assert!(!err.is_retryable());
    }

    #[test]
    fn origin_is_preserved() {
        let err = translate(EngineError::Other(-777), None);
        assert_eq!(err.origin(), Some(&EngineError::Other(-777)));
        let source = err.source().unwrap();
        assert_eq!(source.downcast_ref::<EngineError>(), Some(&EngineError::Other(-777)));
        assert!(err.backtrace().is_some());
    }

    #[test]
    fn non_engine_errors_pass_through() {
        let original: BoxError = Box::new(std::io::Error::other("disk on fire"));
        let original_ptr = &*original as *const _ as *const ();

        let out = Translator::new().translate_any(original, None);
        assert_eq!(&*out as *const _ as *const (), original_ptr);
        assert!(out.downcast_ref::<std::io::Error>().is_some());
        assert!(out.downcast_ref::<DocError>().is_none());
    }

    #[test]
    fn engine_errors_are_translated_when_boxed() {
        let out = Translator::new().translate_any(Box::new(EngineError::KeyExist), Some(&User));
        let doc = out.downcast_ref::<DocError>().unwrap();
        assert_eq!(doc.kind(), ErrorKind::DuplicatePrimaryKey);
    }

    #[test]
    fn run_recovery_halts() {
        let translator = Translator::with_fail_stop(Unwind);
        for err in [EngineError::Panic, EngineError::WannaRecovery, EngineError::Corrupted] {
            let res = catch_unwind(AssertUnwindSafe(|| translator.translate(err, None)));
            assert!(res.is_err(), "{err:?} should not produce a value");
        }
    }

    #[test]
    fn document_not_found_is_reserved() {
        let err = DocError::document_not_found("no such document");
        assert_eq!(err.kind(), ErrorKind::DocumentNotFound);
        assert!(err.origin().is_none());
        assert!(err.backtrace().is_none());
    }

    #[test]
    fn from_engine_error() {
        let err: DocError = EngineError::Deadlock.into();
        assert_eq!(err.kind(), ErrorKind::Deadlock);
    }
}
