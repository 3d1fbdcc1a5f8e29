//! File formats the binary reads and writes.

pub mod csv;
pub mod json;
