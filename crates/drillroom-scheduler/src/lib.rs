pub mod config;
pub mod plan;
pub mod runner;
pub mod runtime;
pub mod signals;
pub mod tick;

pub use config::*;
pub use plan::*;
pub use runner::*;
pub use runtime::*;
pub use signals::*;
pub use tick::*;
