pub mod dedupe;
pub mod orchestrator;
pub mod reconcile;
pub mod retention;

pub use orchestrator::{SyncOutcome, SyncPhase, SyncService};
pub use retention::{cleanup, CleanupOptions};
