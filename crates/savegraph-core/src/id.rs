use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use std::fmt;

new_key_type! {
    /// Identifies a node (building, joint or placeholder) in the production graph.
    pub struct NodeId;

    /// Identifies an edge (connector) in the production graph.
    pub struct EdgeId;

    /// Identifies a logical link in the collapsed view.
    pub struct LinkId;
}

/// Identifier assigned to every object when the save was written.
///
/// Unique across the whole save (entities and components share one id
/// space). Id `0` is the null reference and never names an object.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct ObjectId(pub u64);

impl ObjectId {
    /// The null reference.
    pub const NULL: ObjectId = ObjectId(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
