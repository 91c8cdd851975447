pub mod orchestrator;
pub mod registry;
pub mod traits;
