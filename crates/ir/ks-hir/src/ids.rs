//! Identifiers tying analysis data back to the function body.

use serde::{Deserialize, Serialize};

/// Identifies one syntactic element of a function body.
///
/// Elements are the currency of the analysis: walker events, CFG nodes,
/// dataflow gen/kill sites and diagnostics all name elements. The front end
/// assigns them; the checker only compares them.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementId(pub u32);

/// Identifies a variable binding introduced by a pattern or parameter.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BindingId(pub u32);
