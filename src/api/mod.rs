//! Public API for partalloc.
//!
//! This module contains all user-facing types and functions.
//! Most users only need a root, its config and the flags.

pub mod config;
pub mod error;
pub mod fixed;
pub mod flags;
pub mod generic;
pub mod stats;
