pub mod event_log;
pub mod metrics;

pub use event_log::*;
pub use metrics::*;
