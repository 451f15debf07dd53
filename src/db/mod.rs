//! Database module: entity models and SQL repositories.
//!
//! - `model`: typed rows returned by repositories.
//! - `repo`: SQL-only functions for the subscription and seen-item tables.
//!
//! Callers import from `vinted_watchbot::db`; the repository API is re-exported
//! here. The pool is always passed explicitly, there is no global connection.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{Subscription, NEVER_SYNCED};
