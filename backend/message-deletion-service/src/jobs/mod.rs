//! Background jobs

pub mod retention_sweeper;

pub use retention_sweeper::{CleanupOptions, CleanupReport, RetentionSweeper, SweepReport};
