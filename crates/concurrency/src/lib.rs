//! Concurrency layer for evstore
//!
//! This crate implements optimistic concurrency control (OCC) for appends:
//! - TransactionContext: buffered row writes plus commit conditions
//! - Condition: "row must not exist" and "Head must be at revision N"
//! - Conflict detection at commit time, under a single commit lock
//! - TransactionManager: validate + apply as one critical section

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod manager;
pub mod transaction;
pub mod validation;

pub use manager::TransactionManager;
pub use transaction::{CommitError, Condition, TransactionContext, TransactionStatus};
pub use validation::{head_revision, ConflictType, ValidationResult};
