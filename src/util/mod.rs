//! Small arithmetic helpers shared by the allocator internals.

pub(crate) mod layout;
pub(crate) mod size;
