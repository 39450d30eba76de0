pub mod statistics;
pub mod universe;

pub use statistics::*;
pub use universe::*;
