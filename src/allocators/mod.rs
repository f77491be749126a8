//! Allocation backends.
//!
//! This module contains the partition engine and everything under it.
//! **Nearly all `unsafe` code in the crate lives here.**

pub(crate) mod bucket;
pub(crate) mod direct_map;
pub(crate) mod freelist;
pub mod page;
pub(crate) mod partition;
pub(crate) mod span;
pub(crate) mod superpage;
