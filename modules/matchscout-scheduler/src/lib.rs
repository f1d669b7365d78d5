//! Task assignment and lease reclamation.
//!
//! The scheduler answers "what should this worker do next?" for anonymous
//! pollers with no prior state; the reclaimer is the sweep that frees leases
//! abandoned by workers that vanished without resetting.

pub mod assign;
pub mod reclaim;

pub use assign::Scheduler;
pub use reclaim::{release_stale_assignments, spawn_reclaimer};
