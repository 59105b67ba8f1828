pub mod update;

pub use update::{UpdateError, UpdateOrchestrator, UpdateOutcome};
