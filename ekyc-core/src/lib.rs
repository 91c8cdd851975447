pub mod config;
pub mod conversation;
pub mod progress;
pub mod types;

// Keep the public surface small and intentional.
pub use config::*;
pub use conversation::*;
pub use progress::*;
pub use types::*;
