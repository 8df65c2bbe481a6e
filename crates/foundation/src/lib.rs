pub mod error;
pub mod math;

// Foundation crate: small, well-tested primitives only.
pub use error::*;
pub use math::*;
