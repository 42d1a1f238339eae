//! Transactions and their scoping.
//!
//! A [`Transaction`] is never constructed directly. It is created by
//! [`Environment::transaction`](crate::Environment::transaction), becomes
//! the calling thread's current transaction for the extent of the call, and
//! is committed or aborted when the call ends. Nested calls form a chain
//! through [`Transaction::parent`].

mod scope;
pub(crate) use scope::TxnScope;

mod transaction;
pub use transaction::{Transaction, TransactionState};
