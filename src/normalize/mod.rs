//! Pure text heuristics shared by every source family.

pub mod dates;
pub mod ids;
pub mod text;
