//! Environment lifecycle, nested transaction scoping and error translation
//! over [libmdbx].
//!
//! # Overview
//!
//! This crate is the storage plumbing underneath a document store. It owns
//! three concerns:
//!
//! - The lifecycle of a storage [`Environment`]: configure, open once, close
//!   any number of times.
//! - Scoped units of work: [`Environment::transaction`] runs a closure in a
//!   transaction, nested under the calling thread's current one if there is
//!   one, and commits or aborts it when the closure returns.
//! - Translation of engine statuses into a small, caller-facing
//!   [`DocError`] taxonomy, with fail-stop on unrecoverable corruption.
//!
//! Reading and writing documents is left to collaborators. They reach the
//! ambient transaction with [`Environment::current_transaction`] and issue
//! engine calls through [`Transaction::with_native`].
//!
//! # Quick Start
//!
//! ```no_run
//! use signet_docenv::{ConfigOverrides, DocResult, Environment};
//! use std::time::Duration;
//!
//! fn main() -> DocResult<()> {
//!     let env = Environment::new("/tmp/docs");
//!     env.configure(&ConfigOverrides::new().lock_timeout(Duration::from_secs(5)));
//!     env.open()?;
//!
//!     env.transaction(|outer| {
//!         // A failing inner scope aborts only itself.
//!         let inner: DocResult<()> = env.transaction(|inner| {
//!             assert_eq!(inner.parent().map(|p| p.id()), Some(outer.id()));
//!             Err(signet_docenv::DocError::document_not_found("user:42"))
//!         });
//!         assert!(inner.is_err());
//!         Ok::<_, signet_docenv::DocError>(())
//!     })?;
//!
//!     env.close()?;
//!     Ok(())
//! }
//! ```
//!
//! # Key Concepts
//!
//! - [`Environment`] - One storage path and its native handle. Created closed
//!   via [`Environment::new`] or [`Environment::builder()`].
//! - [`Transaction`] - One unit of work. Created only by
//!   [`Environment::transaction`].
//! - [`EnvConfig`] and [`ConfigOverrides`] - The five environment options
//!   and partial updates to them. Configuration is read when the environment
//!   opens.
//! - [`Translator`] - Folds an [`EngineError`] into a [`DocError`]. Statuses
//!   that require recovery go to a [`FailStop`] instead.
//! - [`Engine`] - The native calls the environment layer makes. [`Mdbx`] is
//!   the libmdbx implementation.
//!
//! # Logging
//!
//! Lifecycle events and transaction boundaries are emitted as [`tracing`]
//! events under the `docenv` target. Each transaction runs inside a
//! `txn` span carrying its id and nesting depth.
//!
//! [libmdbx]: https://github.com/erthink/libmdbx

#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    unreachable_pub,
    clippy::missing_const_for_fn,
    rustdoc::all
)]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![deny(unused_must_use, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub extern crate signet_mdbx_sys as ffi;

pub mod config;
pub use config::{
    ConfigError, ConfigKey, ConfigOverrides, ConfigValue, DatabaseConfig, EnvConfig,
};

mod environment;
pub use environment::{Environment, EnvironmentBuilder};

mod error;
pub use error::{Condition, EngineError, EngineResult};

mod flags;
pub use flags::EnvironmentFlags;

pub mod sys;
pub use sys::{Engine, Mdbx};

mod taxonomy;
pub use taxonomy::{
    BoxError, DocError, DocResult, ErrorKind, ExitProcess, FailStop, KeyContext,
    RUN_RECOVERY_EXIT_CODE, Translator, translate,
};

pub mod tx;
pub use tx::{Transaction, TransactionState};
