pub mod comparison;
pub mod constraints;
pub mod objectives;
pub mod optimize;
pub(crate) mod solver;

pub use comparison::*;
pub use constraints::{Bounds, ConstraintSet, WeightBound};
pub use objectives::ObjectiveKind;
pub use optimize::*;
