pub mod config;
pub mod controller;
pub mod renderer;
pub mod source;

pub use config::*;
pub use controller::*;
pub use renderer::*;
pub use source::*;
