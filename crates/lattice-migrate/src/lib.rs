//! Schema migration engine for the Lattice engine.
//!
//! Split in two: a pure planner (field diff, strict coercions, the
//! safe/cautious/risky/dangerous decision tree, archive entries, rollback
//! merges) and an async runner that drives batches through the
//! `MigrationStore` seam with per-row error accumulation and an audit row
//! per run.

pub mod planner;
mod runner;

pub use planner::{classify_risk, plan_object, plan_rollback, MigrationFlags, ObjectPlan, PlanOutcome};
pub use runner::{MigrationReport, MigrationRunConfig, Migrator, RowOutcome, RowStatus};
