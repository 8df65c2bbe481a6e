pub mod cluster;
pub mod markers;

pub use cluster::*;
pub use markers::*;
