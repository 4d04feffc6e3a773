//! Platform specific locations.

pub mod paths;
