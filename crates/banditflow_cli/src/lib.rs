//! Persistence side of the banditflow driver: provenance capture and the
//! checkpoint record file, shared by the binary and by readers of its output.

pub mod provenance;
pub mod record;
