pub mod config;
pub mod delivery;
pub mod evaluation;
pub mod fact_sheet;
pub mod focus;
pub mod llm;
pub mod naturalizer;
pub mod orchestrator;
pub mod persona;
pub mod repetition;
pub mod reply;
pub mod router;
pub mod session;
pub mod workstream;

pub use config::*;
pub use delivery::*;
pub use evaluation::*;
pub use fact_sheet::*;
pub use focus::*;
pub use llm::*;
pub use naturalizer::*;
pub use orchestrator::*;
pub use persona::*;
pub use repetition::*;
pub use reply::*;
pub use router::*;
pub use session::*;
pub use workstream::*;

use serde::{Deserialize, Serialize};

/// Model reference in `provider/model` form (or an alias) plus ordered
/// fallbacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelPolicy {
    pub primary: String,
    #[serde(default)]
    pub fallbacks: Vec<String>,
}

impl ModelPolicy {
    pub fn new(primary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            fallbacks: Vec::new(),
        }
    }

    /// Primary followed by fallbacks, in order.
    pub fn candidates(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary.as_str()).chain(self.fallbacks.iter().map(String::as_str))
    }
}
