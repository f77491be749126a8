//! Synchronization primitives.
//!
//! The generic root guards its whole partition with one of these.

pub(crate) mod mutex;
