//! Address-free core logic: size classes and page geometry.

pub(crate) mod geometry;
pub(crate) mod size_class;
