//! Agent tool surface for the Lattice engine.
//!
//! A fixed catalog of operations over the stores and the search
//! orchestrator: schema-validated arguments, grant whitelisting at the
//! boundary, stable result and error envelopes. No business logic lives
//! here: every handler is one component call plus shaping.

mod definitions;
mod registry;
pub mod traverse;

pub use definitions::{catalog, ToolDefinition};
pub use registry::{ToolContext, ToolGrants, ToolRegistry};
pub use traverse::{traverse, Direction, Edge, EdgeSource, Traversal, TraversalNode, MAX_VISITED};
